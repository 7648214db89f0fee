//! Error types for nidsfuzz

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("parse error at offset {offset} in rule line: {reason} ({rule_line:?})")]
    Parse {
        rule_line: String,
        offset: usize,
        reason: String,
    },

    #[error("render infeasibility: {0}")]
    RenderInfeasibility(String),

    #[error("injection error: {0}")]
    Injection(String),

    #[error("broker timeout: {0}")]
    BrokerTimeout(String),

    #[error("alignment miss: port {0} outside the reorder window")]
    AlignmentMiss(u16),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("fatal error: {0}")]
    Fatal(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

pub type Result<T> = std::result::Result<T, Error>;
