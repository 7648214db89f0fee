//! The fuzz-loop orchestrator: burst accumulation, on-disk persistence, and
//! the `Fuzzer`/`FuzzerBuilder` that tie selection, mutation, injection, and
//! sanitization together into one campaign.

pub mod accumulation;
pub mod fuzzer;
pub mod persistence;

pub use accumulation::AccumulationAnalyzer;
pub use fuzzer::{Fuzzer, FuzzerBuilder, MutationAlgorithm};
pub use persistence::{load_discrepancies, load_packets, save};
