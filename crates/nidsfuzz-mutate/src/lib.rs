//! Mutation strategies: pass-through, blending, repetition, obfuscation.

pub mod common;
pub mod obfuscation;
pub mod strategy;

pub use strategy::{blending, obfuscation as obfuscate, pass_through, repetition, MutationConfig, RepetitionMode};
