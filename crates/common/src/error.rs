//! Error types for the scenario IR

use thiserror::Error;

/// Result type alias using the IR Error
pub type Result<T> = std::result::Result<T, Error>;

/// Scenario IR error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unrecognized action: {0}")]
    UnrecognizedAction(String),

    #[error("Invalid step {index} in scenario {scenario}: {reason}")]
    InvalidStep {
        scenario: String,
        index: usize,
        reason: String,
    },
}
