//! Engine error types
//!
//! Only construction can fail. Failures while handling signals are contained
//! and logged inside the engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CorrelateError {
    #[error("Invalid exclusion pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),
}

pub type CorrelateResult<T> = Result<T, CorrelateError>;
