//! Error types for the marketplace service

use thiserror::Error;
use zkdm_common::{AssetKind, RequestStatus};
use zkdm_verifier::{KeyDerivationError, VerificationEngineError};

/// Errors raised by the record store and the asset store
#[derive(Debug, Error)]
pub enum StorageError {
    /// The object or record does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// The path does not follow the storage layout
    #[error("invalid storage path '{0}'")]
    InvalidPath(String),

    /// The stored bytes could not be decoded
    #[error("corrupt stored value: {0}")]
    Corrupt(String),

    /// The backend failed or is unreachable
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// A lifecycle transition was attempted when its guard does not hold
#[derive(Debug, Error, PartialEq)]
pub enum StateGuardViolation {
    /// The caller is not the party allowed to perform the action
    #[error("'{actor}' may not {action} this request")]
    NotPermitted { actor: String, action: &'static str },

    /// The request is not in the state the action starts from
    #[error("cannot {action} a request in state {status:?}; it must be {required:?}")]
    InvalidState {
        action: &'static str,
        status: RequestStatus,
        required: RequestStatus,
    },

    /// One or more proof bundle files are absent from the asset store
    #[error("proof bundle incomplete, missing: {}", missing_names(.missing))]
    BundleIncomplete { missing: Vec<AssetKind> },

    /// No result value was supplied
    #[error("a non-empty result is required")]
    MissingResult,

    /// The reference string id is empty or not a valid object name
    #[error("invalid srs_id '{0}'")]
    InvalidSrsId(String),

    /// Approval requires a verified proof
    #[error("proof did not verify: {0}")]
    NotVerified(String),

    /// The record kept changing underneath the transition
    #[error("request changed concurrently {attempts} times; retry")]
    Contended { attempts: u32 },
}

fn missing_names(missing: &[AssetKind]) -> String {
    missing
        .iter()
        .map(|kind| kind.file_name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors raised while driving a request through its lifecycle
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Guard(#[from] StateGuardViolation),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors raised while verifying a completed request
#[derive(Debug, Error)]
pub enum VerificationError {
    /// Dataset, commitment or reference string is not available
    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Guard(#[from] StateGuardViolation),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    KeyDerivation(#[from] KeyDerivationError),

    #[error(transparent)]
    Engine(#[from] VerificationEngineError),
}

/// Errors raised by the compute artifact generator
#[derive(Debug, Error)]
pub enum NotebookError {
    #[error("notebook template is invalid: {0}")]
    Template(String),

    #[error("failed to serialize notebook: {0}")]
    Serialize(#[from] serde_json::Error),
}
