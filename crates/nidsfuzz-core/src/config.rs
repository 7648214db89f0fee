//! Layered runtime configuration for a fuzz campaign.
//!
//! Precedence, lowest to highest: built-in [`FuzzerConfig::default`], an optional
//! TOML file, then explicit CLI flags. Each layer only overrides fields it sets.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzerConfig {
    pub initiator_addr: String,
    pub responder_addr: String,
    pub tuning_port: u16,
    pub tuned_port: u16,
    pub rule_files: Vec<String>,
    pub protocol: Option<String>,
    pub selection_algorithm: String,
    pub batch_size: usize,
    pub batch_num: usize,
    pub mutation_algorithm: String,
    pub repetition_mode: String,
    /// Per-platform NIDS log file path and its tail regex, keyed by platform name.
    pub nids_logs: HashMap<String, NidsLogConfig>,
    pub output_dir: String,
    pub accumulation_threshold: u32,
    pub port_window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NidsLogConfig {
    pub path: String,
    pub regex: String,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        Self {
            initiator_addr: "127.0.0.1".to_string(),
            responder_addr: "127.0.0.1".to_string(),
            tuning_port: 9000,
            tuned_port: 9001,
            rule_files: Vec::new(),
            protocol: None,
            selection_algorithm: "sequential".to_string(),
            batch_size: 1,
            batch_num: 10_000,
            mutation_algorithm: "pass-through".to_string(),
            repetition_mode: "block-wise".to_string(),
            nids_logs: HashMap::new(),
            output_dir: "./nidsfuzz-output".to_string(),
            accumulation_threshold: 1,
            port_window: 1000,
        }
    }
}

/// Partial overrides loaded from a TOML file. Every field is optional: only
/// fields present in the file override the running config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FuzzerConfigFile {
    pub initiator_addr: Option<String>,
    pub responder_addr: Option<String>,
    pub tuning_port: Option<u16>,
    pub tuned_port: Option<u16>,
    pub rule_files: Option<Vec<String>>,
    pub protocol: Option<String>,
    pub selection_algorithm: Option<String>,
    pub batch_size: Option<usize>,
    pub batch_num: Option<usize>,
    pub mutation_algorithm: Option<String>,
    pub repetition_mode: Option<String>,
    #[serde(default)]
    pub nids_logs: HashMap<String, NidsLogConfig>,
    pub output_dir: Option<String>,
    pub accumulation_threshold: Option<u32>,
    pub port_window: Option<usize>,
}

impl FuzzerConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let file: FuzzerConfigFile = toml::from_str(&raw)?;
        let mut config = Self::default();
        config.apply_file(file);
        Ok(config)
    }

    pub fn apply_file(&mut self, file: FuzzerConfigFile) {
        if let Some(v) = file.initiator_addr {
            self.initiator_addr = v;
        }
        if let Some(v) = file.responder_addr {
            self.responder_addr = v;
        }
        if let Some(v) = file.tuning_port {
            self.tuning_port = v;
        }
        if let Some(v) = file.tuned_port {
            self.tuned_port = v;
        }
        if let Some(v) = file.rule_files {
            self.rule_files = v;
        }
        if let Some(v) = file.protocol {
            self.protocol = Some(v);
        }
        if let Some(v) = file.selection_algorithm {
            self.selection_algorithm = v;
        }
        if let Some(v) = file.batch_size {
            self.batch_size = v;
        }
        if let Some(v) = file.batch_num {
            self.batch_num = v;
        }
        if let Some(v) = file.mutation_algorithm {
            self.mutation_algorithm = v;
        }
        if let Some(v) = file.repetition_mode {
            self.repetition_mode = v;
        }
        if !file.nids_logs.is_empty() {
            self.nids_logs = file.nids_logs;
        }
        if let Some(v) = file.output_dir {
            self.output_dir = v;
        }
        if let Some(v) = file.accumulation_threshold {
            self.accumulation_threshold = v;
        }
        if let Some(v) = file.port_window {
            self.port_window = v;
        }
    }

    pub fn output_path(&self) -> PathBuf {
        PathBuf::from(&self.output_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_layer_overrides_defaults_selectively() {
        let mut config = FuzzerConfig::default();
        assert_eq!(config.batch_size, 1);

        let file = FuzzerConfigFile {
            batch_size: Some(4),
            ..Default::default()
        };
        config.apply_file(file);

        assert_eq!(config.batch_size, 4);
        // Untouched fields keep their defaults.
        assert_eq!(config.tuning_port, 9000);
    }

    #[test]
    fn cli_layer_wins_over_file_layer() {
        // S8: file sets batch_size=4, CLI flag sets batch_size=1 afterwards.
        let mut config = FuzzerConfig::default();
        config.apply_file(FuzzerConfigFile {
            batch_size: Some(4),
            ..Default::default()
        });
        config.batch_size = 1; // simulates a CLI override applied last
        assert_eq!(config.batch_size, 1);
    }

    #[test]
    fn loads_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nidsfuzz.toml");
        std::fs::write(&path, "batch_size = 7\noutput_dir = \"/tmp/out\"\n").unwrap();

        let config = FuzzerConfig::from_file(&path).unwrap();
        assert_eq!(config.batch_size, 7);
        assert_eq!(config.output_dir, "/tmp/out");
    }
}
