//! On-disk formats for a discrepancy finding: a human-readable stanza file
//! and a binary packet archive, both append-only.

use std::io::{Read, Write};
use std::path::Path;

use nidsfuzz_core::error::{Error, Result};
use nidsfuzz_sanitize::AlignedBundle;

const SENTINEL: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];

/// Appends one stanza to `discrepancies.txt` and one packet sequence to
/// `packets.bin`, both under `output_dir`.
pub fn save(output_dir: &Path, bundle: &AlignedBundle) -> Result<()> {
    std::fs::create_dir_all(output_dir)?;
    append_discrepancy(output_dir, bundle)?;
    append_packets(output_dir, bundle)?;
    Ok(())
}

fn append_discrepancy(output_dir: &Path, bundle: &AlignedBundle) -> Result<()> {
    let path = output_dir.join("discrepancies.txt");
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;

    let seed_rules = bundle.input_rule_ids().join(", ");
    writeln!(file, "seed rules: {seed_rules}")?;

    let mut platforms: Vec<&String> = bundle.per_platform_alerts().keys().collect();
    platforms.sort();
    for platform in platforms {
        let rule_ids: Vec<String> = bundle.per_platform_alerts()[platform].iter().map(|a| a.rule_id.clone()).collect();
        writeln!(file, "{platform}: {}", rule_ids.join(", "))?;
    }
    writeln!(file)?;

    Ok(())
}

fn append_packets(output_dir: &Path, bundle: &AlignedBundle) -> Result<()> {
    let path = output_dir.join("packets.bin");
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;

    let test_bundle = bundle.test_bundle();
    write_framed(&mut file, &test_bundle.request)?;
    write_framed(&mut file, &test_bundle.response)?;
    file.write_all(&SENTINEL)?;

    Ok(())
}

fn write_framed(file: &mut std::fs::File, data: &[u8]) -> Result<()> {
    file.write_all(&(data.len() as u32).to_be_bytes())?;
    file.write_all(data)?;
    Ok(())
}

/// Reads `discrepancies.txt` into its stanzas: (seed rules, per-platform rule ids).
pub fn load_discrepancies(path: &Path) -> Result<Vec<(Vec<String>, Vec<(String, Vec<String>)>)>> {
    let content = std::fs::read_to_string(path)?;
    let mut stanzas = Vec::new();

    for raw_stanza in content.split("\n\n") {
        let mut lines = raw_stanza.lines().filter(|l| !l.is_empty());
        let Some(seed_line) = lines.next() else { continue };
        let seed_rules = seed_line
            .strip_prefix("seed rules: ")
            .ok_or_else(|| Error::Parse {
                rule_line: seed_line.to_string(),
                offset: 0,
                reason: "missing 'seed rules:' header".to_string(),
            })?
            .split(", ")
            .map(|s| s.to_string())
            .collect();

        let mut platforms = Vec::new();
        for line in lines {
            if let Some((platform, rules)) = line.split_once(": ") {
                let rule_ids = if rules.is_empty() {
                    Vec::new()
                } else {
                    rules.split(", ").map(|s| s.to_string()).collect()
                };
                platforms.push((platform.to_string(), rule_ids));
            }
        }

        stanzas.push((seed_rules, platforms));
    }

    Ok(stanzas)
}

/// Reads `packets.bin` into a sequence of bundles, each a `Vec<(request, response)>`.
pub fn load_packets(path: &Path) -> Result<Vec<Vec<(Vec<u8>, Vec<u8>)>>> {
    let mut file = std::fs::File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    let mut bundles = Vec::new();
    let mut current = Vec::new();
    let mut pos = 0usize;

    while pos < bytes.len() {
        if bytes[pos..].starts_with(&SENTINEL) {
            pos += 4;
            bundles.push(std::mem::take(&mut current));
            continue;
        }

        let request_len = read_u32(&bytes, pos)?;
        pos += 4;
        let request = bytes[pos..pos + request_len].to_vec();
        pos += request_len;

        let response_len = read_u32(&bytes, pos)?;
        pos += 4;
        let response = bytes[pos..pos + response_len].to_vec();
        pos += response_len;

        current.push((request, response));
    }

    Ok(bundles)
}

fn read_u32(bytes: &[u8], pos: usize) -> Result<usize> {
    if pos + 4 > bytes.len() {
        return Err(Error::Fatal("truncated packets.bin length prefix".to_string()));
    }
    Ok(u32::from_be_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]]) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nidsfuzz_rules::Rule;
    use nidsfuzz_sanitize::{Alert, TestBundle};
    use std::sync::Arc;

    fn bundle() -> AlignedBundle {
        let rule = Arc::new(Rule::parse(r#"alert tcp any any -> any any (content:"x"; sid:1;)"#).unwrap());
        let mut bundle = AlignedBundle::new(TestBundle {
            rules: vec![rule],
            initiator_endpoint: ("127.0.0.1".parse().unwrap(), 40001),
            responder_endpoint: ("127.0.0.1".parse().unwrap(), 9000),
            request: b"GET / HTTP/1.1\r\n\r\n".to_vec(),
            response: b"HTTP/1.1 200 OK\r\n\r\n".to_vec(),
        });
        bundle.add_alert(
            "suricata",
            Alert {
                rule_id: "1:1:1".to_string(),
                src_ip: "127.0.0.1".parse().unwrap(),
                src_port: 40001,
                dst_ip: "127.0.0.1".parse().unwrap(),
                dst_port: 9000,
            },
        );
        bundle
    }

    #[test]
    fn round_trips_discrepancies_stanza() {
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), &bundle()).unwrap();

        let stanzas = load_discrepancies(&dir.path().join("discrepancies.txt")).unwrap();
        assert_eq!(stanzas.len(), 1);
        assert_eq!(stanzas[0].0, vec!["1:1:1".to_string()]);
        assert_eq!(stanzas[0].1, vec![("suricata".to_string(), vec!["1:1:1".to_string()])]);
    }

    #[test]
    fn round_trips_packets_with_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), &bundle()).unwrap();

        let bundles = load_packets(&dir.path().join("packets.bin")).unwrap();
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].len(), 1);
        assert_eq!(bundles[0][0].0, b"GET / HTTP/1.1\r\n\r\n".to_vec());
    }

    #[test]
    fn appends_multiple_findings_as_separate_stanzas_and_bundles() {
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), &bundle()).unwrap();
        save(dir.path(), &bundle()).unwrap();

        let stanzas = load_discrepancies(&dir.path().join("discrepancies.txt")).unwrap();
        assert_eq!(stanzas.len(), 2);

        let bundles = load_packets(&dir.path().join("packets.bin")).unwrap();
        assert_eq!(bundles.len(), 2);
    }
}
