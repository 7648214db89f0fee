//! Signature rendering and protocol grammar templates.

pub mod grammar;
pub mod pcre_sample;
pub mod render;

pub use grammar::{Direction, Grammar};
pub use render::{RenderMode, SignatureRender};
