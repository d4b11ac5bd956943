//! Binding between proof instances and a published dataset commitment.

use halo2curves_axiom::bn256::Fr;
use thiserror::Error;
use zkdm_common::{decode_scaled, fr_to_hex, CircuitSettings, DataCommitment};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommitmentMismatch {
    #[error("proof exposes {actual} instance value(s), settings expect {expected}")]
    InstanceCount { expected: usize, actual: usize },

    #[error("commitment has no digest for column '{column}' at scale {scale}")]
    MissingDigest { column: String, scale: u32 },

    #[error("column '{column}' digest at scale {scale} does not match the commitment")]
    DigestMismatch { column: String, scale: u32 },
}

/// Checks that every input digest in the proof equals the committed digest of
/// the same column at the scale the proof was generated with.
pub fn match_commitment(
    settings: &CircuitSettings,
    instances: &[Vec<Fr>],
    commitment: &DataCommitment,
) -> Result<(), CommitmentMismatch> {
    let values = instances.first().map(Vec::as_slice).unwrap_or_default();
    let expected = settings.circuit.instance_len();
    if instances.len() != 1 || values.len() != expected {
        return Err(CommitmentMismatch::InstanceCount {
            expected,
            actual: instances.iter().map(Vec::len).sum(),
        });
    }

    let scale = settings.run_args.input_scale;
    for (column, digest) in settings.input_columns.iter().zip(values) {
        let committed = commitment.digest(scale, column).ok_or_else(|| {
            CommitmentMismatch::MissingDigest {
                column: column.clone(),
                scale,
            }
        })?;
        if !committed.eq_ignore_ascii_case(&fr_to_hex(digest)) {
            return Err(CommitmentMismatch::DigestMismatch {
                column: column.clone(),
                scale,
            });
        }
    }
    Ok(())
}

/// Decoded computation output carried as the last instance value.
pub fn proven_output(settings: &CircuitSettings, instances: &[Vec<Fr>]) -> Option<f64> {
    let output = instances.first()?.last()?;
    decode_scaled(output, settings.output_scale())
}
