//! Error types for proof verification and key derivation

use thiserror::Error;
use zkdm_common::{AgreedComputation, DataShape};

/// One of the verification inputs could not be decoded. A proof that decodes
/// but does not verify is reported as `Ok(false)`, never as this error.
#[derive(Debug, Error)]
#[error("malformed {input}: {message}")]
pub struct VerificationEngineError {
    pub input: &'static str,
    pub message: String,
}

impl VerificationEngineError {
    pub fn new(input: &'static str, message: impl ToString) -> Self {
        Self {
            input,
            message: message.to_string(),
        }
    }
}

/// Errors raised while resolving a verification key
#[derive(Debug, Error)]
pub enum KeyDerivationError {
    /// Settings, witness or computation text could not be used
    #[error("invalid key derivation input: {0}")]
    InvalidInput(String),

    /// The settings were produced for a different computation text
    #[error("settings were produced for a different computation")]
    ComputationMismatch,

    /// The circuit proves a different built-in computation or reads
    /// different columns than the request agreed to
    #[error("settings prove {proven} but the request agreed to {agreed}")]
    FunctionMismatch {
        agreed: AgreedComputation,
        proven: AgreedComputation,
    },

    /// Declared, witnessed and configured shapes disagree
    #[error("data shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch { expected: DataShape, found: String },

    /// The reference string named by the settings is unavailable or invalid
    #[error("reference string '{srs_id}' unavailable: {message}")]
    ReferenceString { srs_id: String, message: String },

    /// The remote derivation service failed or answered malformed data
    #[error("key derivation service error: {0}")]
    Service(String),

    /// Local key generation failed
    #[error("key generation failed: {0}")]
    Keygen(String),
}
