//! Produces one concrete byte string matching a pcre-option regex.
//!
//! This is a leftmost single-match sampler, not a general regex engine: it
//! walks the pattern left to right and greedily emits the first literal
//! alternative for any construct that has one, taking the minimum
//! repetition count for quantifiers. That is enough for IDS signature
//! patterns, which are almost always literal runs punctuated by a handful
//! of character classes, and matches the "any one generator sample
//! suffices" latitude.

use rand::Rng;

pub fn sample(pattern: &str) -> Option<Vec<u8>> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    let mut rng = rand::thread_rng();

    while i < chars.len() {
        match chars[i] {
            '^' | '$' => i += 1,
            '\\' => {
                if i + 1 >= chars.len() {
                    return None;
                }
                let escaped = escape_literal(chars[i + 1])?;
                i += 2;
                let (rep_min, next_i) = read_quantifier(&chars, i);
                i = next_i;
                for _ in 0..rep_min.max(1) {
                    out.extend_from_slice(&escaped);
                }
            }
            '[' => {
                let (class_bytes, next_i) = read_class(&chars, i)?;
                i = next_i;
                let (rep_min, next_i) = read_quantifier(&chars, i);
                i = next_i;
                let pick = *class_bytes.get(0).unwrap_or(&b'a');
                for _ in 0..rep_min.max(1) {
                    out.push(pick);
                }
            }
            '(' => {
                // Take the first alternative in the group, ignore the rest.
                let (group_end, first_alt) = read_group_first_alt(&chars, i)?;
                i = group_end;
                let (rep_min, next_i) = read_quantifier(&chars, i);
                i = next_i;
                for _ in 0..rep_min.max(1) {
                    if let Some(bytes) = sample(&first_alt) {
                        out.extend_from_slice(&bytes);
                    }
                }
            }
            '.' => {
                let (rep_min, next_i) = read_quantifier(&chars, i + 1);
                i = next_i;
                for _ in 0..rep_min.max(1) {
                    out.push(rng.gen_range(b'a'..=b'z'));
                }
            }
            c => {
                i += 1;
                let (rep_min, next_i) = read_quantifier(&chars, i);
                i = next_i;
                let mut buf = [0u8; 4];
                let encoded = c.encode_utf8(&mut buf);
                for _ in 0..rep_min.max(1) {
                    out.extend_from_slice(encoded.as_bytes());
                }
            }
        }
    }

    Some(out)
}

fn escape_literal(c: char) -> Option<Vec<u8>> {
    match c {
        'd' => Some(b"5".to_vec()),
        'w' => Some(b"a".to_vec()),
        's' => Some(b" ".to_vec()),
        'n' => Some(b"\n".to_vec()),
        'r' => Some(b"\r".to_vec()),
        't' => Some(b"\t".to_vec()),
        other => {
            let mut buf = [0u8; 4];
            Some(other.encode_utf8(&mut buf).as_bytes().to_vec())
        }
    }
}

/// Reads a `[...]` character class starting at `chars[i] == '['`, returning
/// a representative byte set and the index just past the closing `]`.
fn read_class(chars: &[char], i: usize) -> Option<(Vec<u8>, usize)> {
    let mut j = i + 1;
    let negated = chars.get(j) == Some(&'^');
    if negated {
        j += 1;
    }
    let start = j;
    while j < chars.len() && chars[j] != ']' {
        j += 1;
    }
    if j >= chars.len() {
        return None;
    }
    let body: String = chars[start..j].iter().collect();
    let representative = if negated {
        b'x'
    } else if let Some(c) = body.chars().find(|c| c.is_ascii()) {
        c as u8
    } else {
        b'x'
    };
    Some((vec![representative], j + 1))
}

/// Reads `*`, `+`, `?`, `{m,n}` following a token; returns the minimum
/// repeat count to emit and the index past the quantifier (0 if absent,
/// 1 for a bare token).
fn read_quantifier(chars: &[char], i: usize) -> (usize, usize) {
    match chars.get(i) {
        Some('*') => (0, i + 1),
        Some('+') => (1, i + 1),
        Some('?') => (0, i + 1),
        Some('{') => {
            let mut j = i + 1;
            let start = j;
            while j < chars.len() && chars[j] != '}' {
                j += 1;
            }
            if j >= chars.len() {
                return (1, i);
            }
            let body: String = chars[start..j].iter().collect();
            let min = body
                .split(',')
                .next()
                .and_then(|s| s.trim().parse::<usize>().ok())
                .unwrap_or(1);
            (min, j + 1)
        }
        _ => (1, i),
    }
}

/// Returns the index just past a parenthesized group and the pattern text
/// of its first `|`-alternative (non-capturing/capturing prefixes stripped).
fn read_group_first_alt(chars: &[char], i: usize) -> Option<(usize, String)> {
    let mut depth = 0;
    let mut j = i;
    let mut body_start = i + 1;

    if chars.get(i + 1) == Some(&'?') {
        // (?:...), (?i), etc: skip to the first ':' or treat whole as literal skip.
        if let Some(colon_offset) = chars[i..].iter().position(|&c| c == ':') {
            body_start = i + colon_offset + 1;
        }
    }

    while j < chars.len() {
        match chars[j] {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    let body: String = chars[body_start..j].iter().collect();
                    let first_alt = body.split('|').next().unwrap_or("").to_string();
                    return Some((j + 1, first_alt));
                }
            }
            _ => {}
        }
        j += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_literal_run() {
        let bytes = sample("news_id=[^0-9]+").unwrap();
        assert!(bytes.starts_with(b"news_id="));
    }

    #[test]
    fn samples_alternation_first_branch() {
        let bytes = sample("(GET|POST) /x").unwrap();
        assert!(bytes.starts_with(b"GET"));
    }

    #[test]
    fn samples_digit_class() {
        let bytes = sample(r"\d{3}").unwrap();
        assert_eq!(bytes.len(), 3);
    }
}
