//! Typed rule options.
//!
//! The source uses a polymorphic `Option` hierarchy with dynamic dispatch;
//! here it is a sum type consumed by the renderer via exhaustive case
//! analysis (see design note in the specification). Modifiers are struct
//! fields, not string-keyed dictionaries.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use nidsfuzz_core::error::{Error, Result};

/// One option as it appeared in the rule body, in original declaration
/// order, preserved for idempotent re-serialization regardless of whether
/// it was also parsed into a typed [`Option`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOption {
    pub name: String,
    pub value: Option<String>,
}

impl RawOption {
    pub fn render(&self) -> String {
        match &self.value {
            Some(v) => format!("{}:{}", self.name, v),
            None => self.name.clone(),
        }
    }
}

/// A typed, signature-bearing option grouped under one sticky buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Option {
    Content(Content),
    Pcre(Pcre),
    Isdataat(Isdataat),
    ByteTest(ByteTest),
    /// Anything parsed but not interpreted by the renderer (bufferlen,
    /// dsize, and any option name the compiler does not assign special
    /// meaning to within a sticky buffer's signature).
    Other { name: String, raw: std::option::Option<String> },
}

// --- Content ------------------------------------------------------------

static CONTENT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^(?P<negated>!)?"(?P<body>(?:[^"\\]|\\.)*)"\s*,?\s*(?P<modifiers>.*)$"#).unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Content {
    pub raw: String,
    pub ascii_match: String,
    pub negated: bool,
    pub nocase: bool,
    pub rawbytes: bool,
    pub fast_pattern: bool,
    pub offset: std::option::Option<i64>,
    pub depth: std::option::Option<i64>,
    pub distance: std::option::Option<i64>,
    pub within: std::option::Option<i64>,
}

impl Content {
    pub fn from_str(raw: &str) -> Result<Content> {
        let caps = CONTENT_PATTERN.captures(raw).ok_or_else(|| Error::Parse {
            rule_line: raw.to_string(),
            offset: 0,
            reason: "invalid content option".to_string(),
        })?;

        let mut content = Content {
            raw: raw.to_string(),
            ascii_match: caps["body"].to_string(),
            negated: caps.name("negated").is_some(),
            ..Default::default()
        };

        let modifiers = caps["modifiers"].trim();
        if !modifiers.is_empty() {
            for modifier in modifiers.split(',') {
                let modifier = modifier.trim();
                if modifier.is_empty() {
                    continue;
                }
                match modifier {
                    "nocase" => content.nocase = true,
                    "rawbytes" => content.rawbytes = true,
                    "fast_pattern" => content.fast_pattern = true,
                    _ => {
                        let mut parts = modifier.splitn(2, char::is_whitespace);
                        let key = parts.next().unwrap_or_default();
                        let value: i64 = parts
                            .next()
                            .unwrap_or_default()
                            .trim()
                            .parse()
                            .map_err(|_| Error::Parse {
                                rule_line: raw.to_string(),
                                offset: 0,
                                reason: format!("invalid content modifier: {modifier}"),
                            })?;
                        match key {
                            "offset" => content.offset = Some(value),
                            "depth" => content.depth = Some(value),
                            "distance" => content.distance = Some(value),
                            "within" => content.within = Some(value),
                            _ => {
                                return Err(Error::Parse {
                                    rule_line: raw.to_string(),
                                    offset: 0,
                                    reason: format!("unknown content modifier: {key}"),
                                })
                            }
                        }
                    }
                }
            }
        }

        Ok(content)
    }

    /// Decodes the mixed ASCII / `|hex hex|` match syntax into bytes.
    /// Even-indexed segments (0-based) are ASCII; odd-indexed segments are
    /// whitespace-separated hex byte pairs.
    pub fn match_bytes(&self) -> Vec<u8> {
        let segments: Vec<&str> = self.ascii_match.split('|').collect();
        if segments.len() < 3 {
            return self.ascii_match.as_bytes().to_vec();
        }

        let mut result = Vec::new();
        for (i, segment) in segments.iter().enumerate() {
            if i % 2 == 1 {
                for hex_byte in segment.split_whitespace() {
                    if let Ok(b) = u8::from_str_radix(hex_byte, 16) {
                        result.push(b);
                    }
                }
            } else {
                result.extend_from_slice(segment.as_bytes());
            }
        }
        result
    }

    pub fn render(&self) -> String {
        format!(r#"content:{};"#, self.raw)
    }
}

// --- Pcre -----------------------------------------------------------------

static PCRE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^(?P<negated>!)?"/(?P<body>.*)/(?P<flags>[ismxAEGOR]*)"$"#).unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pcre {
    pub raw: String,
    pub pattern: String,
    pub negated: bool,
    pub flags: String,
}

impl Pcre {
    pub fn from_str(raw: &str) -> Result<Pcre> {
        let caps = PCRE_PATTERN.captures(raw).ok_or_else(|| Error::Parse {
            rule_line: raw.to_string(),
            offset: 0,
            reason: "invalid pcre option".to_string(),
        })?;

        Ok(Pcre {
            raw: raw.to_string(),
            pattern: caps["body"].to_string(),
            negated: caps.name("negated").is_some(),
            flags: caps["flags"].to_string(),
        })
    }

    pub fn case_insensitive(&self) -> bool {
        self.flags.contains('i')
    }
    pub fn dot_matches_newline(&self) -> bool {
        self.flags.contains('s')
    }
    pub fn multi_line(&self) -> bool {
        self.flags.contains('m')
    }
    pub fn extended(&self) -> bool {
        self.flags.contains('x')
    }
    pub fn anchored_start(&self) -> bool {
        self.flags.contains('A')
    }
    pub fn anchored_end(&self) -> bool {
        self.flags.contains('E')
    }
    pub fn ungreedy(&self) -> bool {
        self.flags.contains('G')
    }
    pub fn override_limits(&self) -> bool {
        self.flags.contains('O')
    }
    /// `R`: relative to the cursor, instead of global to the buffer.
    pub fn relative(&self) -> bool {
        self.flags.contains('R')
    }

    /// Decodes `\xHH` escapes in the pattern body into their literal
    /// character, matching the source's `literal_match`.
    pub fn literal_pattern(&self) -> String {
        static HEX_ESCAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\x([0-9a-fA-F]{2})").unwrap());
        HEX_ESCAPE
            .replace_all(&self.pattern, |caps: &regex::Captures| {
                let byte = u8::from_str_radix(&caps[1], 16).unwrap_or(b'?');
                (byte as char).to_string()
            })
            .into_owned()
    }

    pub fn render(&self) -> String {
        format!(r#"pcre:{};"#, self.raw)
    }
}

// --- Isdataat ---------------------------------------------------------------

static ISDATAAT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<negated>!)?\s*(?P<location>\d+)\s*(?:,\s*relative)?$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Isdataat {
    pub raw: String,
    pub negated: bool,
    pub location: u64,
    pub relative: bool,
}

impl Isdataat {
    pub fn from_str(raw: &str) -> Result<Isdataat> {
        let caps = ISDATAAT_PATTERN.captures(raw).ok_or_else(|| Error::Parse {
            rule_line: raw.to_string(),
            offset: 0,
            reason: "invalid isdataat option".to_string(),
        })?;

        Ok(Isdataat {
            raw: raw.to_string(),
            negated: caps.name("negated").is_some(),
            location: caps["location"].parse().unwrap_or(0),
            relative: raw.contains("relative"),
        })
    }

    pub fn render(&self) -> String {
        format!(r#"isdataat:{};"#, self.raw)
    }
}

// --- ByteTest -----------------------------------------------------------

static BYTE_TEST_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<count>[1-9]|10),\s*(?P<negated>!)?(?P<operator><=|>=|<|>|=|&|\^),\s*(?P<compare>[^,]+),\s*(?P<offset>[^,]+)(?:,\s*(?P<relative>relative))?",
    )
    .unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ByteTest {
    pub raw: String,
    pub count: u32,
    pub negated: bool,
    pub operator: String,
    pub compare: String,
    pub offset: i64,
    pub relative: bool,
}

impl ByteTest {
    pub fn from_str(raw: &str) -> Result<ByteTest> {
        let caps = BYTE_TEST_PATTERN.captures(raw).ok_or_else(|| Error::Parse {
            rule_line: raw.to_string(),
            offset: 0,
            reason: "invalid byte_test option".to_string(),
        })?;

        Ok(ByteTest {
            raw: raw.to_string(),
            count: caps["count"].parse().unwrap_or(0),
            negated: caps.name("negated").is_some(),
            operator: caps["operator"].to_string(),
            compare: caps["compare"].trim().to_string(),
            offset: caps["offset"].trim().parse().map_err(|_| Error::Parse {
                rule_line: raw.to_string(),
                offset: 0,
                reason: "invalid byte_test offset".to_string(),
            })?,
            relative: caps.name("relative").is_some(),
        })
    }

    pub fn render(&self) -> String {
        format!(r#"byte_test:{};"#, self.raw)
    }
}

// --- Flow -----------------------------------------------------------------

/// `flow:to_server,established;` etc. Stored as the set of comma-separated
/// tokens; direction helpers mirror the subset the rest of the system needs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Flow {
    pub raw: String,
    pub tokens: HashSet<String>,
}

impl Flow {
    pub fn from_str(raw: &str) -> Flow {
        Flow {
            raw: raw.to_string(),
            tokens: raw.split(',').map(|t| t.trim().to_string()).collect(),
        }
    }

    pub fn to_client(&self) -> bool {
        self.tokens.contains("to_client")
    }
    pub fn from_server(&self) -> bool {
        self.tokens.contains("from_server")
    }
    pub fn to_server(&self) -> bool {
        self.tokens.contains("to_server")
    }
    pub fn from_client(&self) -> bool {
        self.tokens.contains("from_client")
    }
}

// --- Flowbits ---------------------------------------------------------------

/// `flowbits:{set|unset|setx|toggle},bit[&bit]…;` or
/// `flowbits:{isset|isnotset},bit[&bit|bit]…;` or `flowbits:noalert;`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Flowbits {
    pub raw: String,
    pub noalert: bool,
    setters: HashSet<String>,
    checkers: HashSet<String>,
}

impl Flowbits {
    const SET_VERBS: &'static [&'static str] = &["set", "setx", "unset", "toggle"];
    const CHECK_VERBS: &'static [&'static str] = &["isset", "isnotset"];

    pub fn from_str(raw: &str) -> Result<Flowbits> {
        let mut parts = raw.splitn(2, ',');
        let verb = parts.next().unwrap_or("").trim();

        if verb == "noalert" {
            return Ok(Flowbits {
                raw: raw.to_string(),
                noalert: true,
                ..Default::default()
            });
        }

        let names = parts.next().ok_or_else(|| Error::Parse {
            rule_line: raw.to_string(),
            offset: 0,
            reason: format!("flowbits verb '{verb}' expects a bit list"),
        })?;

        let mut flowbits = Flowbits {
            raw: raw.to_string(),
            ..Default::default()
        };

        if Self::SET_VERBS.contains(&verb) {
            flowbits.setters = names.split('&').map(|s| s.trim().to_string()).collect();
        } else if Self::CHECK_VERBS.contains(&verb) {
            flowbits.checkers = names
                .split(['&', '|'])
                .map(|s| s.trim().to_string())
                .collect();
        } else {
            return Err(Error::Parse {
                rule_line: raw.to_string(),
                offset: 0,
                reason: format!("unknown flowbits verb: {verb}"),
            });
        }

        Ok(flowbits)
    }

    pub fn setters(&self) -> &HashSet<String> {
        &self.setters
    }

    pub fn checkers(&self) -> &HashSet<String> {
        &self.checkers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_decodes_mixed_hex_and_ascii() {
        let c = Content::from_str(r#""div|3A 3A|first-letter",nocase"#).unwrap();
        assert_eq!(c.match_bytes(), b"div::first-letter");
        assert!(c.nocase);
    }

    #[test]
    fn content_parses_distance_and_within() {
        let c = Content::from_str(r#""world!",distance 1,within 7"#).unwrap();
        assert_eq!(c.distance, Some(1));
        assert_eq!(c.within, Some(7));
    }

    #[test]
    fn content_parses_negation() {
        let c = Content::from_str(r#"!"Hello, this is Quagga:Bob",fast_pattern,nocase"#).unwrap();
        assert!(c.negated);
        assert!(c.fast_pattern);
        assert_eq!(c.ascii_match, "Hello, this is Quagga:Bob");
    }

    #[test]
    fn pcre_parses_flags_and_negation() {
        let p = Pcre::from_str(r#""/news_id=[^0-9]+/i""#).unwrap();
        assert!(p.case_insensitive());
        assert!(!p.relative());
        assert_eq!(p.pattern, "news_id=[^0-9]+");
    }

    #[test]
    fn pcre_decodes_hex_escapes() {
        let p = Pcre::from_str(r#""/^file\x3a\x2f\x2f[^\n]{400}/mi""#).unwrap();
        assert_eq!(p.literal_pattern(), "^file://[^\\n]{400}");
    }

    #[test]
    fn isdataat_parses_relative_and_negation() {
        let i = Isdataat::from_str("!29,relative").unwrap();
        assert!(i.negated);
        assert!(i.relative);
        assert_eq!(i.location, 29);
    }

    #[test]
    fn byte_test_parses_required_fields() {
        let b = ByteTest::from_str("2, >, 0x7fff, 0, relative, little").unwrap();
        assert_eq!(b.count, 2);
        assert_eq!(b.operator, ">");
        assert_eq!(b.compare, "0x7fff");
        assert_eq!(b.offset, 0);
        assert!(b.relative);
    }

    #[test]
    fn flowbits_splits_setters_on_ampersand() {
        let f = Flowbits::from_str("set,flagA&flagB").unwrap();
        assert_eq!(f.setters().len(), 2);
        assert!(f.setters().contains("flagA"));
    }

    #[test]
    fn flowbits_splits_checkers_on_ampersand_or_pipe() {
        let f = Flowbits::from_str("isset,flag1&flag2").unwrap();
        assert_eq!(f.checkers().len(), 2);
    }

    #[test]
    fn flow_exposes_direction_helpers() {
        let f = Flow::from_str("to_server,established");
        assert!(f.to_server());
        assert!(!f.to_client());
    }
}
