//! Error types for commitment generation

use thiserror::Error;
use zkdm_common::EngineError;

/// Result type alias for commitment operations
pub type Result<T> = std::result::Result<T, CommitmentError>;

/// Errors that can occur while committing to a dataset
#[derive(Debug, Error)]
pub enum CommitmentError {
    /// The dataset file could not be read as named numeric columns
    #[error("failed to parse dataset: {0}")]
    Parse(String),

    /// The process-wide proof engine has not been initialised
    #[error("proof engine is not initialised")]
    EngineNotReady,

    /// A value could not be encoded at one of the requested scales
    #[error("column '{column}': {source}")]
    Encode {
        column: String,
        #[source]
        source: EngineError,
    },

    /// Any other proof engine failure
    #[error(transparent)]
    Engine(EngineError),
}

impl From<EngineError> for CommitmentError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotReady => CommitmentError::EngineNotReady,
            other => CommitmentError::Engine(other),
        }
    }
}

impl From<csv::Error> for CommitmentError {
    fn from(err: csv::Error) -> Self {
        CommitmentError::Parse(err.to_string())
    }
}
