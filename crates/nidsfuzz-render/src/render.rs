//! The signature renderer: turns a per-buffer option list into concrete
//! bytes honoring every option's position/length predicate.

use rand::seq::SliceRandom;
use rand::Rng;

use nidsfuzz_core::ProtoType;
use nidsfuzz_rules::Option as RuleOption;

use crate::pcre_sample;

/// Printable ASCII plus the whitespace a text protocol's framing relies on
/// (CR, LF, TAB), used as padding for `ProtoType::Text` signatures so random
/// filler bytes don't themselves break line-oriented parsing.
const TEXT_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789 !\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~\r\n\t";

/// The full byte range, used as padding for `ProtoType::Binary` signatures.
const BINARY_ALPHABET_RANGE: std::ops::RangeInclusive<u16> = 0..=255;

fn default_alphabet_for(proto_type: ProtoType) -> Vec<u8> {
    match proto_type {
        ProtoType::Text => TEXT_ALPHABET.to_vec(),
        ProtoType::Binary => BINARY_ALPHABET_RANGE.map(|b| b as u8).collect(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    PassThrough,
    /// The gap-aware variant used when blending multiple rules' options
    /// into a shared buffer.
    Blending,
    /// Repeated content's offset is interpreted relative to the cursor
    /// rather than the start of the buffer, and `isdataat` is ignored.
    Repetition,
}

#[derive(Debug, Clone)]
struct Chunk {
    index: usize,
    data: Vec<u8>,
}

/// Owned by exactly one mutator instance; constructed empty, fed options in
/// order, rendered once.
#[derive(Debug, Clone)]
pub struct SignatureRender {
    mode: RenderMode,
    chunks: Vec<Chunk>,
    cursor: usize,
    min_length: usize,
    max_length: Option<usize>,
    default_alphabet: Vec<u8>,
    padding_alphabet: Vec<u8>,
    pub global_pcre_data: Vec<Vec<u8>>,
}

impl SignatureRender {
    pub fn new(mode: RenderMode, proto_type: ProtoType) -> SignatureRender {
        let default_alphabet = default_alphabet_for(proto_type);
        SignatureRender {
            mode,
            chunks: Vec::new(),
            cursor: 0,
            min_length: 0,
            max_length: None,
            padding_alphabet: default_alphabet.clone(),
            default_alphabet,
            global_pcre_data: Vec::new(),
        }
    }

    /// Dispatches on option kind, per §4.3's per-kind push semantics.
    pub fn push(&mut self, option: &RuleOption) -> bool {
        match option {
            RuleOption::Content(c) if c.negated => self.push_negated_content(c),
            RuleOption::Content(c) => self.push_content(c),
            RuleOption::Pcre(p) => self.push_pcre(p),
            RuleOption::Isdataat(i) => self.push_isdataat(i),
            RuleOption::ByteTest(b) => self.push_bytetest(b),
            RuleOption::Other { .. } => true,
        }
    }

    fn push_content(&mut self, content: &nidsfuzz_rules::Content) -> bool {
        let data = content.match_bytes();
        if data.is_empty() {
            return true;
        }

        if self.mode == RenderMode::Blending {
            return self.push_content_blending(content, &data);
        }

        let index = if self.chunks.is_empty() && content.offset.is_some() {
            content.offset.unwrap().max(0) as usize
        } else if content.offset.is_none() && content.depth.is_none() && content.distance.is_none() && content.within.is_none() {
            self.cursor
        } else if content.distance.is_some() || content.within.is_some() {
            let distance = content.distance.unwrap_or(0).max(0) as usize;
            let candidate = self.cursor + distance;
            if let Some(within) = content.within {
                if data.len() as i64 > within {
                    return false;
                }
            }
            candidate
        } else {
            let offset = content.offset.unwrap_or(0).max(0) as usize;
            if self.mode == RenderMode::Repetition && offset < self.cursor {
                self.cursor + offset
            } else {
                if offset < self.cursor {
                    return false;
                }
                if let Some(depth) = content.depth {
                    if (offset as i64) + data.len() as i64 > offset as i64 + depth {
                        return false;
                    }
                }
                offset
            }
        };

        self.commit_chunk(index, data)
    }

    fn push_content_blending(&mut self, content: &nidsfuzz_rules::Content, data: &[u8]) -> bool {
        for gap in self.available_gaps() {
            if gap.1.saturating_sub(gap.0) < data.len() {
                continue;
            }
            if let Some(offset) = content.offset {
                if (offset as usize) < gap.0 || (offset as usize) + data.len() > gap.1 {
                    continue;
                }
                return self.commit_chunk(offset as usize, data.to_vec());
            }
            return self.commit_chunk(gap.0, data.to_vec());
        }
        false
    }

    fn available_gaps(&self) -> Vec<(usize, usize)> {
        let mut gaps = Vec::new();
        let mut prev_end = 0usize;
        for chunk in &self.chunks {
            if chunk.index > prev_end {
                gaps.push((prev_end, chunk.index));
            }
            prev_end = prev_end.max(chunk.index + chunk.data.len());
        }
        gaps.push((prev_end, self.max_length.unwrap_or(prev_end + 4096)));
        gaps
    }

    fn commit_chunk(&mut self, index: usize, data: Vec<u8>) -> bool {
        let end = index + data.len();
        if let Some(max) = self.max_length {
            if end > max && self.min_length > max {
                return false;
            }
        }
        self.cursor = end;
        self.chunks.push(Chunk { index, data });
        self.chunks.sort_by_key(|c| c.index);
        true
    }

    fn push_negated_content(&mut self, content: &nidsfuzz_rules::Content) -> bool {
        let forbidden = content.match_bytes();
        self.padding_alphabet.retain(|b| !forbidden.contains(b));
        true
    }

    fn push_pcre(&mut self, pcre: &nidsfuzz_rules::Pcre) -> bool {
        if pcre.negated {
            return true;
        }

        let sample = match pcre_sample::sample(&pcre.literal_pattern()) {
            Some(bytes) => bytes,
            None => return false,
        };

        if pcre.relative() {
            self.commit_chunk(self.cursor, sample)
        } else {
            self.global_pcre_data.push(sample.clone());
            self.commit_chunk(self.cursor, sample)
        }
    }

    fn push_isdataat(&mut self, isdataat: &nidsfuzz_rules::Isdataat) -> bool {
        if self.mode == RenderMode::Repetition {
            return true;
        }

        let anchor = if isdataat.relative { self.cursor } else { 0 };
        let location = isdataat.location as usize;

        if isdataat.negated {
            let tentative_max = location + anchor;
            if self.min_length > tentative_max {
                return false;
            }
            self.max_length = Some(self.max_length.map_or(tentative_max, |m| m.min(tentative_max)));
        } else {
            let tentative_min = 1 + location + anchor;
            if let Some(max) = self.max_length {
                if tentative_min > max {
                    return false;
                }
            }
            self.min_length = self.min_length.max(tentative_min);
        }
        true
    }

    fn push_bytetest(&mut self, byte_test: &nidsfuzz_rules::ByteTest) -> bool {
        let anchor = if byte_test.relative { self.cursor } else { 0 };
        let floor = anchor + (byte_test.offset.max(0) as usize) + byte_test.count as usize;
        self.min_length = self.min_length.max(floor);
        true
    }

    pub fn render(&self) -> Vec<u8> {
        let mut rng = rand::thread_rng();
        let mut output = Vec::new();

        for chunk in &self.chunks {
            while output.len() < chunk.index {
                output.push(self.pick_padding_byte(&mut rng));
            }
            output.extend_from_slice(&chunk.data);
        }

        if output.len() < self.min_length {
            let target = match self.max_length {
                Some(max) if max >= self.min_length => rng.gen_range(self.min_length..=max.max(self.min_length)),
                _ => self.min_length,
            };
            while output.len() < target {
                output.push(self.pick_padding_byte(&mut rng));
            }
        }

        if let Some(max) = self.max_length {
            if output.len() > max {
                tracing::warn!(
                    rendered_len = output.len(),
                    max_length = max,
                    "rendered buffer exceeds max_length; keeping the longer, semantically-correct output"
                );
            }
        }

        output
    }

    fn pick_padding_byte(&self, rng: &mut impl Rng) -> u8 {
        if self.padding_alphabet.is_empty() {
            return *self.default_alphabet.choose(rng).unwrap();
        }
        *self.padding_alphabet.choose(rng).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nidsfuzz_rules::{Content, Isdataat, Pcre};

    fn render_with(mode: RenderMode) -> SignatureRender {
        SignatureRender::new(mode, ProtoType::Text)
    }

    fn content(raw: &str) -> Content {
        Content::from_str(raw).unwrap()
    }

    #[test]
    fn appends_content_at_cursor_with_no_position_options() {
        let mut render = render_with(RenderMode::PassThrough);
        assert!(render.push(&RuleOption::Content(content(r#""GET""#))));
        assert!(render.push(&RuleOption::Content(content(r#""/admin""#))));
        assert_eq!(render.render(), b"GET/admin");
    }

    #[test]
    fn honors_explicit_offset_for_first_chunk() {
        let mut render = render_with(RenderMode::PassThrough);
        assert!(render.push(&RuleOption::Content(content(r#""GET",offset 4"#))));
        let out = render.render();
        assert_eq!(&out[4..7], b"GET");
    }

    #[test]
    fn negated_content_shrinks_padding_alphabet_without_emitting_bytes() {
        let mut render = render_with(RenderMode::PassThrough);
        assert!(render.push(&RuleOption::Content(content(r#"!"A""#))));
        assert!(render.push(&RuleOption::Isdataat(Isdataat::from_str("4").unwrap())));
        let out = render.render();
        assert!(!out.contains(&b'A'));
    }

    #[test]
    fn isdataat_raises_min_length() {
        let mut render = render_with(RenderMode::PassThrough);
        assert!(render.push(&RuleOption::Isdataat(Isdataat::from_str("10").unwrap())));
        assert!(render.render().len() >= 11);
    }

    #[test]
    fn conflicting_isdataat_bounds_reject_the_push() {
        let mut render = render_with(RenderMode::PassThrough);
        assert!(render.push(&RuleOption::Isdataat(Isdataat::from_str("!5").unwrap())));
        assert!(!render.push(&RuleOption::Isdataat(Isdataat::from_str("10").unwrap())));
    }

    #[test]
    fn pcre_without_relative_flag_records_global_sample() {
        let mut render = render_with(RenderMode::PassThrough);
        let pcre = Pcre::from_str(r#""/abc/""#).unwrap();
        assert!(render.push(&RuleOption::Pcre(pcre)));
        assert_eq!(render.global_pcre_data.len(), 1);
    }

    #[test]
    fn blending_places_two_contents_in_available_gaps() {
        let mut render = render_with(RenderMode::Blending);
        assert!(render.push(&RuleOption::Content(content(r#""AAAA",offset 0"#))));
        assert!(render.push(&RuleOption::Content(content(r#""BBBB",offset 10"#))));
        let out = render.render();
        assert_eq!(&out[0..4], b"AAAA");
        assert_eq!(&out[10..14], b"BBBB");
    }

    #[test]
    fn binary_padding_alphabet_is_not_restricted_to_printable_ascii() {
        let render = SignatureRender::new(RenderMode::PassThrough, ProtoType::Binary);
        assert_eq!(render.default_alphabet.len(), 256);
    }

    #[test]
    fn text_padding_alphabet_excludes_non_printable_control_bytes() {
        let render = SignatureRender::new(RenderMode::PassThrough, ProtoType::Text);
        assert!(render.default_alphabet.len() < 256);
        assert!(!render.default_alphabet.contains(&0u8));
    }
}
