//! Parsed IDS rules: header, body, and the derived views the rest of the
//! pipeline consumes (id, port, service, per-buffer signature).

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use nidsfuzz_core::error::{Error, Result};

use crate::option::{ByteTest, Content, Flow, Flowbits, Isdataat, Option as RuleOption, Pcre, RawOption};
use crate::sticky_buffer::StickyBuffer;

static RULE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<enabled>#)*[\s#]*(?P<header>[^()]+)\((?P<options>.*)\)\s*$").unwrap()
});

static IGNORED_OPTION_NAMES: &[&str] = &[
    "msg", "flow", "metadata", "service", "reference", "classtype", "gid", "sid", "rev",
];

static LIST_OPTION_NAMES: &[&str] = &[
    "content", "pcre", "isdataat", "reference", "flowbits", "bufferlen", "byte_test",
];

/// A rule's packet-header match: action, protocol, addresses, ports and
/// direction, exactly as written (including bracketed lists and `any`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub action: String,
    pub protocol: String,
    pub src_ip: String,
    pub src_port: String,
    pub direction: String,
    pub dst_ip: String,
    pub dst_port: String,
}

impl Header {
    /// Tokenizes a rule header, respecting `[a,b,c]` bracketed lists as a
    /// single token (they contain unescaped commas but no parens).
    fn tokenize(raw: &str) -> Result<Vec<String>> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        let mut depth = 0usize;

        for ch in raw.trim().chars() {
            match ch {
                '[' => {
                    depth += 1;
                    current.push(ch);
                }
                ']' => {
                    if depth == 0 {
                        return Err(Error::Parse {
                            rule_line: raw.to_string(),
                            offset: 0,
                            reason: "unbalanced ']' in rule header".to_string(),
                        });
                    }
                    depth -= 1;
                    current.push(ch);
                }
                c if c.is_whitespace() && depth == 0 => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            }
        }
        if !current.is_empty() {
            tokens.push(current);
        }

        if depth != 0 {
            return Err(Error::Parse {
                rule_line: raw.to_string(),
                offset: 0,
                reason: "unbalanced '[' in rule header".to_string(),
            });
        }

        Ok(tokens)
    }

    pub fn parse(raw: &str) -> Result<Header> {
        let tokens = Self::tokenize(raw)?;

        // A single-token header is a decoder rule: only `action` is set.
        if tokens.len() == 1 {
            return Ok(Header {
                action: tokens[0].clone(),
                protocol: String::new(),
                src_ip: String::new(),
                src_port: String::new(),
                direction: String::new(),
                dst_ip: String::new(),
                dst_port: String::new(),
            });
        }

        if tokens.len() != 7 {
            return Err(Error::Parse {
                rule_line: raw.to_string(),
                offset: 0,
                reason: format!("expected 7 header fields, found {}", tokens.len()),
            });
        }

        Ok(Header {
            action: tokens[0].clone(),
            protocol: tokens[1].clone(),
            src_ip: tokens[2].clone(),
            src_port: tokens[3].clone(),
            direction: tokens[4].clone(),
            dst_ip: tokens[5].clone(),
            dst_port: tokens[6].clone(),
        })
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {}",
            self.action, self.protocol, self.src_ip, self.src_port, self.direction, self.dst_ip, self.dst_port
        )
    }
}

/// The parenthesized, semicolon-delimited body of a rule.
#[derive(Debug, Clone, Default)]
pub struct RuleBody {
    /// Flat, ordered option list, used for lossless re-serialization.
    pub options: Vec<RawOption>,
    /// Typed, sticky-buffer-scoped signature options.
    pub signature: HashMap<StickyBuffer, Vec<RuleOption>>,
    pub flow: Option<Flow>,
    pub flowbits: Vec<Flowbits>,
}

impl RuleBody {
    /// Finds the index of the `;` terminating the option starting at `start`,
    /// skipping escaped semicolons (`\;`) inside quoted matches.
    fn find_opt_end(raw: &str, start: usize) -> Option<usize> {
        let bytes = raw.as_bytes();
        let mut i = start;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' => i += 2,
                b';' => return Some(i),
                _ => i += 1,
            }
        }
        None
    }

    pub fn parse(raw: &str) -> Result<RuleBody> {
        let mut body = RuleBody::default();
        let mut sticky = StickyBuffer::default();

        let mut pos = 0usize;
        let trimmed = raw.trim();
        let bytes_len = trimmed.len();

        while pos < bytes_len {
            // Skip leading whitespace between options.
            while pos < bytes_len && trimmed.as_bytes()[pos].is_ascii_whitespace() {
                pos += 1;
            }
            if pos >= bytes_len {
                break;
            }

            let end = Self::find_opt_end(trimmed, pos).unwrap_or(bytes_len);
            let option_text = trimmed[pos..end].trim();
            pos = end + 1;

            if option_text.is_empty() {
                continue;
            }

            let (name, value) = match option_text.split_once(':') {
                Some((n, v)) => (n.trim().to_string(), Some(v.trim().to_string())),
                None => (option_text.trim().to_string(), None),
            };

            body.options.push(RawOption {
                name: name.clone(),
                value: value.clone(),
            });

            if let Some(buf) = StickyBuffer::lookup(&name) {
                sticky = buf;
                continue;
            }

            match name.as_str() {
                "flow" => {
                    if let Some(v) = &value {
                        body.flow = Some(Flow::from_str(v));
                    }
                }
                "flowbits" => {
                    if let Some(v) = &value {
                        body.flowbits.push(Flowbits::from_str(v)?);
                    }
                }
                "content" => {
                    if let Some(v) = &value {
                        let content = Content::from_str(v)?;
                        body.signature
                            .entry(sticky)
                            .or_default()
                            .push(RuleOption::Content(content));
                    }
                }
                "pcre" => {
                    if let Some(v) = &value {
                        let pcre = Pcre::from_str(v)?;
                        body.signature.entry(sticky).or_default().push(RuleOption::Pcre(pcre));
                    }
                }
                "isdataat" => {
                    if let Some(v) = &value {
                        let isdataat = Isdataat::from_str(v)?;
                        body.signature
                            .entry(sticky)
                            .or_default()
                            .push(RuleOption::Isdataat(isdataat));
                    }
                }
                "byte_test" => {
                    if let Some(v) = &value {
                        let byte_test = ByteTest::from_str(v)?;
                        body.signature
                            .entry(sticky)
                            .or_default()
                            .push(RuleOption::ByteTest(byte_test));
                    }
                }
                _ => {
                    body.signature.entry(sticky).or_default().push(RuleOption::Other {
                        name: name.clone(),
                        raw: value,
                    });
                }
            }
        }

        Ok(body)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|o| o.name == name)
            .and_then(|o| o.value.as_deref())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.options
            .iter()
            .filter(|o| o.name == name)
            .filter_map(|o| o.value.as_deref())
            .collect()
    }

    pub fn is_list_option(name: &str) -> bool {
        LIST_OPTION_NAMES.contains(&name)
    }
}

impl fmt::Display for RuleBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for opt in &self.options {
            write!(f, "{}", opt.render())?;
        }
        Ok(())
    }
}

/// A fully parsed rule: header, body, and enable/comment state.
#[derive(Debug, Clone)]
pub struct Rule {
    pub raw: String,
    pub enabled: bool,
    pub header: Header,
    pub body: RuleBody,
}

impl Rule {
    pub fn parse(line: &str) -> Result<Rule> {
        let caps = RULE_PATTERN.captures(line).ok_or_else(|| Error::Parse {
            rule_line: line.to_string(),
            offset: 0,
            reason: "line does not match the rule grammar".to_string(),
        })?;

        let enabled = caps.name("enabled").is_none();
        let header = Header::parse(&caps["header"])?;
        let body = RuleBody::parse(&caps["options"])?;

        Ok(Rule {
            raw: line.to_string(),
            enabled,
            header,
            body,
        })
    }

    /// `gid:sid:rev`, defaulting gid and rev to `"1"` when absent.
    pub fn id(&self) -> String {
        let gid = self.body.get("gid").unwrap_or("1");
        let sid = self.body.get("sid").unwrap_or("0");
        let rev = self.body.get("rev").unwrap_or("1");
        format!("{gid}:{sid}:{rev}")
    }

    /// The port this rule's alert will carry, resolved via its flow
    /// direction: `to_client`/`from_server` alerts use the source port,
    /// everything else uses the destination port.
    pub fn port(&self) -> &str {
        if let Some(flow) = &self.body.flow {
            if flow.to_client() || flow.from_server() {
                return &self.header.src_port;
            }
        }
        &self.header.dst_port
    }

    /// The logical service this rule targets, falling back to the wire
    /// protocol when no explicit `service` option is present.
    pub fn service(&self) -> &str {
        self.body.get("service").unwrap_or(&self.header.protocol)
    }

    /// A normalized view of the rule's signature with option names and
    /// ignored bookkeeping options stripped, leaving only the values that
    /// make two rules "fuzzily" distinguishable.
    pub fn fuzzy_signature(&self) -> String {
        static OPTION_NAME_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_]+:").unwrap());

        self.body
            .options
            .iter()
            .filter(|o| !IGNORED_OPTION_NAMES.contains(&o.name.as_str()))
            .map(|o| {
                let rendered = o.render();
                OPTION_NAME_PREFIX.replace(&rendered, "").into_owned()
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.enabled {
            write!(f, "# ")?;
        }
        write!(f, "{} ({})", self.header, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HTTP_RULE: &str = r#"alert tcp any any -> any 80 (msg:"demo"; flow:to_server,established; content:"GET"; http_method; content:"/admin"; http_uri; nocase; sid:1001; rev:2; gid:1;)"#;

    #[test]
    fn parses_header_and_enabled_state() {
        let rule = Rule::parse(HTTP_RULE).unwrap();
        assert!(rule.enabled);
        assert_eq!(rule.header.action, "alert");
        assert_eq!(rule.header.protocol, "tcp");
        assert_eq!(rule.header.dst_port, "80");
    }

    #[test]
    fn parses_commented_rule() {
        let rule = Rule::parse(&format!("# {HTTP_RULE}")).unwrap();
        assert!(!rule.enabled);
    }

    #[test]
    fn id_defaults_gid_and_uses_explicit_sid_rev() {
        let rule = Rule::parse(HTTP_RULE).unwrap();
        assert_eq!(rule.id(), "1:1001:2");
    }

    #[test]
    fn port_uses_dst_port_for_to_server_flow() {
        let rule = Rule::parse(HTTP_RULE).unwrap();
        assert_eq!(rule.port(), "80");
    }

    #[test]
    fn port_uses_src_port_for_to_client_flow() {
        let raw = r#"alert tcp any 80 -> any any (flow:to_client,established; content:"200 OK"; sid:2;)"#;
        let rule = Rule::parse(raw).unwrap();
        assert_eq!(rule.port(), "80");
    }

    #[test]
    fn service_falls_back_to_protocol() {
        let raw = r#"alert tcp any any -> any any (content:"x"; sid:3;)"#;
        let rule = Rule::parse(raw).unwrap();
        assert_eq!(rule.service(), "tcp");
    }

    #[test]
    fn signature_groups_options_by_sticky_buffer() {
        let rule = Rule::parse(HTTP_RULE).unwrap();
        assert!(rule.body.signature.contains_key(&StickyBuffer::HttpMethod));
        assert!(rule.body.signature.contains_key(&StickyBuffer::HttpUri));
    }

    #[test]
    fn single_token_header_parses_as_a_decoder_rule() {
        let rule = Rule::parse(r#"decoder_event_ipv4_frag_too_large (msg:"bad frag"; sid:5;)"#).unwrap();
        assert_eq!(rule.header.action, "decoder_event_ipv4_frag_too_large");
        assert_eq!(rule.header.protocol, "");
        assert_eq!(rule.header.dst_port, "");
    }

    #[test]
    fn bracketed_header_lists_tokenize_as_one_field() {
        let raw = r#"alert tcp [10.0.0.0/8,192.168.0.0/16] any -> any any (content:"x"; sid:4;)"#;
        let rule = Rule::parse(raw).unwrap();
        assert_eq!(rule.header.src_ip, "[10.0.0.0/8,192.168.0.0/16]");
    }

    #[test]
    fn fuzzy_signature_drops_ignored_options() {
        let rule = Rule::parse(HTTP_RULE).unwrap();
        let fuzzy = rule.fuzzy_signature();
        assert!(!fuzzy.contains("demo"));
        assert!(fuzzy.contains("admin") || fuzzy.contains("GET"));
    }
}
