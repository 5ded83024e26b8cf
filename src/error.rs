//! Error kinds surfaced by the drivers.
//!
//! The queue itself never returns errors; only success or empty. Everything
//! here is reported before threads start (configuration, input files) or
//! after they have joined (verification), and maps to process exit code 1.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BenchError {
    /// Invalid flag combination, rejected before any thread starts.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Graph or solution file missing or unreadable.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Graph or solution file readable but malformed.
    #[error("malformed input: {0}")]
    Parse(String),

    /// Computed distances disagree with the reference solution.
    #[error("verification failed: {0}")]
    Verification(String),
}
