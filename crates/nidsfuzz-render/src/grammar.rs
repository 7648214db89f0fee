//! Wire templates that splice rendered buffers into full request/response
//! byte streams.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

/// An ordered field -> default bytes map, populated by buffer name and
/// rendered field-by-field in declaration order.
#[derive(Debug, Clone)]
struct Template {
    fields: Vec<(String, Vec<u8>)>,
    /// Index of the field content lands on when no buffer name matches any
    /// declared field.
    body_field: usize,
    /// Index of the blank-line field separating headers from body. A
    /// synthesized `Content-Length` header is inserted immediately before
    /// this field, whichever direction it came from, so it always lands in
    /// the header block rather than before the start line or inside the body.
    crlf_field: Option<usize>,
    emit_content_length: bool,
}

impl Template {
    fn populate(&self, buffer_values: &HashMap<String, Vec<u8>>) -> Vec<(String, Vec<u8>)> {
        let mut fields = self.fields.clone();
        let mut unmatched = Vec::new();

        for (name, bytes) in buffer_values {
            if let Some(field) = fields.iter_mut().find(|(n, _)| n == name) {
                field.1 = bytes.clone();
            } else {
                unmatched.push(bytes.clone());
            }
        }

        if !unmatched.is_empty() {
            let body = &mut fields[self.body_field].1;
            for bytes in unmatched {
                body.extend_from_slice(&bytes);
            }
        }

        if self.emit_content_length {
            let insert_at = self.crlf_field.expect("emit_content_length requires a crlf_field");
            let body_len: usize = fields[self.body_field].1.len();
            let header = format!("Content-Length: {body_len}\r\n").into_bytes();
            fields.insert(insert_at, ("content_length".to_string(), header));
        }

        fields
    }

    fn generate(&self, buffer_values: &HashMap<String, Vec<u8>>) -> Vec<u8> {
        self.populate(buffer_values)
            .into_iter()
            .flat_map(|(_, bytes)| bytes)
            .collect()
    }
}

pub struct Grammar {
    request: Template,
    response: Template,
}

impl Grammar {
    pub fn generate(&self, direction: Direction, buffer_values: &HashMap<String, Vec<u8>>) -> Vec<u8> {
        match direction {
            Direction::Request => self.request.generate(buffer_values),
            Direction::Response => self.response.generate(buffer_values),
        }
    }

    /// The single-field `pkt_data` template used for unrecognized protocols.
    pub fn fallback() -> Grammar {
        let template = Template {
            fields: vec![("pkt_data".to_string(), Vec::new())],
            body_field: 0,
            crlf_field: None,
            emit_content_length: false,
        };
        Grammar {
            request: template.clone(),
            response: template,
        }
    }

    pub fn http() -> Grammar {
        let request = Template {
            fields: vec![
                ("http_method".to_string(), b"GET".to_vec()),
                (" ".to_string(), b" ".to_vec()),
                ("http_uri".to_string(), b"/connecttest.txt".to_vec()),
                (" http_version".to_string(), b" HTTP/1.1\r\n".to_vec()),
                (
                    "headers".to_string(),
                    b"Connection: Close\r\nUser-Agent: Microsoft NCSI\r\nHost: www.msftconnecttest.com\r\nContent-Type: text\r\n".to_vec(),
                ),
                ("crlf".to_string(), b"\r\n".to_vec()),
                ("http_client_body".to_string(), Vec::new()),
            ],
            body_field: 6,
            crlf_field: Some(5),
            emit_content_length: true,
        };

        let response = Template {
            fields: vec![
                ("http_version".to_string(), b"HTTP/1.1 ".to_vec()),
                ("http_stat_code".to_string(), b"200".to_vec()),
                (" http_stat_msg".to_string(), b" OK\r\n".to_vec()),
                (
                    "headers".to_string(),
                    b"Date: Tue, 01 Jan 2030 00:00:00 GMT\r\nConnection: close\r\nContent-Type: text/plain\r\nCache-Control: no-cache\r\n"
                        .to_vec(),
                ),
                ("crlf".to_string(), b"\r\n".to_vec()),
                ("http_raw_body".to_string(), Vec::new()),
            ],
            body_field: 5,
            crlf_field: Some(4),
            emit_content_length: true,
        };

        Grammar { request, response }
    }

    pub fn sip() -> Grammar {
        let request = Template {
            fields: vec![
                ("sip_method".to_string(), b"INVITE".to_vec()),
                (" sip_uri".to_string(), b" sip:bob@biloxi.com".to_vec()),
                (" sip_version".to_string(), b" SIP/2.0\r\n".to_vec()),
                (
                    "headers".to_string(),
                    b"Via: SIP/2.0/UDP biloxi.com\r\nMax-Forwards: 70\r\nFrom: <sip:alice@atlanta.com>\r\nTo: <sip:bob@biloxi.com>\r\nCall-ID: nidsfuzz-call@atlanta.com\r\nCSeq: 1 INVITE\r\nContent-Type: application/sdp\r\n".to_vec(),
                ),
                ("crlf".to_string(), b"\r\n".to_vec()),
                ("sip_body".to_string(), Vec::new()),
            ],
            body_field: 5,
            crlf_field: Some(4),
            emit_content_length: true,
        };

        let response = Template {
            fields: vec![
                ("sip_version".to_string(), b"SIP/2.0 ".to_vec()),
                ("sip_stat_code".to_string(), b"100".to_vec()),
                (" sip_stat_msg".to_string(), b" Trying\r\n".to_vec()),
                (
                    "headers".to_string(),
                    b"Via: SIP/2.0/UDP biloxi.com\r\nMax-Forwards: 70\r\nFrom: <sip:alice@atlanta.com>\r\nTo: <sip:bob@biloxi.com>\r\nCall-ID: nidsfuzz-call@atlanta.com\r\nCSeq: 1 INVITE\r\nUser-Agent: nidsfuzz\r\n".to_vec(),
                ),
                ("crlf".to_string(), b"\r\n".to_vec()),
                ("sip_body".to_string(), Vec::new()),
            ],
            body_field: 5,
            crlf_field: Some(4),
            emit_content_length: true,
        };

        Grammar { request, response }
    }
}

/// Returns the named grammar, falling back to the single-buffer default for
/// unknown names.
pub fn lookup(name: &str) -> Grammar {
    match name.to_ascii_lowercase().as_str() {
        "http" => Grammar::http(),
        "sip" => Grammar::sip(),
        _ => Grammar::fallback(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_request_content_length_lands_in_header_block_not_before_the_start_line() {
        let grammar = Grammar::http();
        let mut values = HashMap::new();
        values.insert("http_client_body".to_string(), b"a=1&b=2".to_vec());
        let bytes = grammar.generate(Direction::Request, &values);
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.starts_with("GET /connecttest.txt HTTP/1.1"));
        let blank_line = text.find("\r\n\r\n").unwrap();
        let cl_pos = text.find("Content-Length: 7").unwrap();
        assert!(cl_pos < blank_line, "Content-Length must precede the header/body blank line");
    }

    #[test]
    fn http_response_content_length_lands_before_the_blank_line_after_the_status_line() {
        let grammar = Grammar::http();
        let mut values = HashMap::new();
        values.insert("http_raw_body".to_string(), b"hello".to_vec());
        let bytes = grammar.generate(Direction::Response, &values);
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        let blank_line = text.find("\r\n\r\n").unwrap();
        let cl_pos = text.find("Content-Length: 5").unwrap();
        assert!(cl_pos < blank_line);
    }

    #[test]
    fn sip_request_content_length_lands_in_header_block_not_inside_the_body() {
        let grammar = Grammar::sip();
        let mut values = HashMap::new();
        values.insert("sip_body".to_string(), b"v=0".to_vec());
        let bytes = grammar.generate(Direction::Request, &values);
        let text = String::from_utf8_lossy(&bytes);
        let headers_pos = text.find("Content-Type").unwrap();
        let blank_line = text.find("\r\n\r\n").unwrap();
        let cl_pos = text.find("Content-Length").unwrap();
        assert!(cl_pos > headers_pos);
        assert!(cl_pos < blank_line, "Content-Length must precede the blank line, not land in the body");
        assert!(text[blank_line + 4..].starts_with("v=0"));
    }

    #[test]
    fn unknown_protocol_falls_back_to_pkt_data() {
        let grammar = lookup("modbus");
        let mut values = HashMap::new();
        values.insert("pkt_data".to_string(), b"\x01\x02".to_vec());
        let bytes = grammar.generate(Direction::Request, &values);
        assert_eq!(bytes, b"\x01\x02");
    }
}
