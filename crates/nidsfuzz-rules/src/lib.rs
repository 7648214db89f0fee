//! Rule grammar: parsing, typed options, sticky buffers, and rule sets.

pub mod option;
pub mod rule;
pub mod ruleset;
pub mod sticky_buffer;

pub use option::{ByteTest, Content, Flow, Flowbits, Isdataat, Option, Pcre, RawOption};
pub use rule::{Header, Rule, RuleBody};
pub use ruleset::RuleSet;
pub use sticky_buffer::StickyBuffer;
