//! The protocol-category distinction mutators and grammars need: whether a
//! protocol's wire format is human-readable text (and therefore safe to
//! obfuscate with path-shifting/URL-encoding transforms) or opaque binary.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtoType {
    Text,
    Binary,
}

impl ProtoType {
    pub fn of(service: &str) -> ProtoType {
        match service.to_ascii_lowercase().as_str() {
            "http" | "sip" | "ftp" | "smtp" | "telnet" => ProtoType::Text,
            _ => ProtoType::Binary,
        }
    }
}

impl fmt::Display for ProtoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtoType::Text => write!(f, "text"),
            ProtoType::Binary => write!(f, "binary"),
        }
    }
}
