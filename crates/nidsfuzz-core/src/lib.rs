//! Core types, error taxonomy, configuration, and logging shared across all
//! nidsfuzz components.

pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;

pub use config::{FuzzerConfig, FuzzerConfigFile, NidsLogConfig};
pub use error::{Error, Result};
pub use protocol::ProtoType;
