//! Text-protocol-only content transforms: path shifting and URL encoding.

use rand::seq::SliceRandom;
use rand::Rng;

const PATH_VARIANTS: &[&str] = &["//", "/./", "/~/../"];
const UNSAFE_CHARS: &[u8] = b" \"#%<>[]{}|\\^`~";

/// Inserts one of `{//, /./, /~/../}` before or after up to `count` `/`
/// characters in the ASCII view of `content`.
pub fn path_shift(content: &str, count: usize) -> String {
    let mut rng = rand::thread_rng();
    let mut chars: Vec<char> = content.chars().collect();
    let slash_positions: Vec<usize> = chars
        .iter()
        .enumerate()
        .filter(|(_, c)| **c == '/')
        .map(|(i, _)| i)
        .collect();

    if slash_positions.is_empty() {
        return content.to_string();
    }

    let mut chosen: Vec<usize> = slash_positions.clone();
    chosen.shuffle(&mut rng);
    chosen.truncate(count.min(chosen.len()));
    chosen.sort_unstable_by(|a, b| b.cmp(a));

    for pos in chosen {
        let variant = PATH_VARIANTS.choose(&mut rng).unwrap();
        let before = rng.gen_bool(0.5);
        let insert_at = if before { pos } else { pos + 1 };
        for (offset, ch) in variant.chars().enumerate() {
            chars.insert(insert_at + offset, ch);
        }
    }

    chars.into_iter().collect()
}

/// Percent-encodes up to `count` reserved/unsafe/control characters (or
/// `~`). Re-escapes any literal `|` produced or already present as `|7C|`
/// to keep the content option's `|hex|` syntax valid.
pub fn url_encode(content: &str, count: usize) -> String {
    let mut rng = rand::thread_rng();
    let bytes = content.as_bytes();

    let candidates: Vec<usize> = bytes
        .iter()
        .enumerate()
        .filter(|(_, b)| UNSAFE_CHARS.contains(b) || **b == b'~' || b.is_ascii_control())
        .map(|(i, _)| i)
        .collect();

    if candidates.is_empty() {
        return content.to_string();
    }

    let mut chosen = candidates.clone();
    chosen.shuffle(&mut rng);
    chosen.truncate(count.min(chosen.len()));
    let chosen: std::collections::HashSet<usize> = chosen.into_iter().collect();

    let mut out = String::new();
    for (i, b) in bytes.iter().enumerate() {
        if chosen.contains(&i) {
            out.push_str(&format!("%{:02X}", b));
        } else if *b == b'|' {
            out.push_str("|7C|");
        } else {
            out.push(*b as char);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_shift_inserts_variant_near_slash() {
        let shifted = path_shift("/admin/login", 1);
        assert!(shifted.len() > "/admin/login".len());
    }

    #[test]
    fn path_shift_is_noop_without_slashes() {
        assert_eq!(path_shift("noslashes", 2), "noslashes");
    }

    #[test]
    fn url_encode_escapes_pipe_as_hex_literal() {
        let encoded = url_encode("a|b", 0);
        assert_eq!(encoded, "a|7C|b");
    }

    #[test]
    fn url_encode_percent_encodes_unsafe_chars() {
        let encoded = url_encode("a b", 1);
        assert!(encoded.contains("%20"));
    }
}
