//! Alert tailing, windowed alignment, and differential oracles.

pub mod aligner;
pub mod bundle;
pub mod monitor;
pub mod oracle;

pub use aligner::Aligner;
pub use bundle::{Alert, AlignedBundle, Endpoint, TestBundle};
pub use monitor::{AlertMonitor, MonitorHandle};
pub use oracle::{Finding, OracleRegistry};
