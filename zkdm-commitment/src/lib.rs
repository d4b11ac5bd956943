//! zkdm-commitment
//!
//! Derives the per-column, per-scale commitment a dataset owner publishes
//! before any computation runs on the data.
//!
//! For every requested scale and every column, each value is fixed-point
//! encoded with [`encode_scaled`], the encoded series is serialised
//! canonically and the canonical bytes are hashed by the proof engine. The
//! resulting map `{ scale: { column: digest } }` is deterministic in the
//! column values and the scale.

pub mod error;
pub mod parse;

use halo2curves_axiom::bn256::Fr;
use tracing::info;
use zkdm_common::{
    canonical_sequence, encode_scaled, fr_to_hex, DataCommitment, EngineSlot, ProofEngine,
};

pub use error::{CommitmentError, Result};
pub use parse::{parse_dataset, DatasetFormat, ParsedColumn, ParsedDataset};

/// Parses `bytes` and commits to every column at every scale, using the
/// process-global engine.
pub fn generate_commitment(
    bytes: &[u8],
    format: DatasetFormat,
    scales: &[u32],
) -> Result<DataCommitment> {
    let dataset = parse_dataset(bytes, format)?;
    commit_dataset(&dataset, scales)
}

pub fn commit_dataset(dataset: &ParsedDataset, scales: &[u32]) -> Result<DataCommitment> {
    let engine = zkdm_common::engine()?;
    commit_with_engine(engine, dataset, scales)
}

/// Same as [`commit_dataset`] against an explicit engine slot.
pub fn commit_dataset_in(
    slot: &EngineSlot,
    dataset: &ParsedDataset,
    scales: &[u32],
) -> Result<DataCommitment> {
    let engine = slot.get()?;
    commit_with_engine(engine, dataset, scales)
}

pub fn commit_with_engine(
    engine: &ProofEngine,
    dataset: &ParsedDataset,
    scales: &[u32],
) -> Result<DataCommitment> {
    let mut commitment = DataCommitment::new();
    for &scale in scales {
        for column in dataset.columns() {
            let digest = column_digest(engine, &column.values, scale).map_err(|source| {
                CommitmentError::Encode {
                    column: column.name.clone(),
                    source,
                }
            })?;
            commitment.insert(scale, column.name.clone(), fr_to_hex(&digest));
        }
    }
    info!(
        columns = dataset.columns().len(),
        scales = scales.len(),
        "generated data commitment"
    );
    Ok(commitment)
}

/// Encoded series of `values` at `scale`.
pub fn encode_column(values: &[f64], scale: u32) -> std::result::Result<Vec<Fr>, zkdm_common::EngineError> {
    values
        .iter()
        .map(|value| encode_scaled(*value, scale))
        .collect()
}

/// Digest of one column at one scale.
pub fn column_digest(
    engine: &ProofEngine,
    values: &[f64],
    scale: u32,
) -> std::result::Result<Fr, zkdm_common::EngineError> {
    let encoded = encode_column(values, scale)?;
    engine.hash_sequence(&canonical_sequence(&encoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use zkdm_common::{ensure_ready, supported_scales};

    const X_ORIGINAL: &[u8] = br#"{"x": [1.0, 2.0, 3.0]}"#;
    const X_MUTATED: &[u8] = br#"{"x": [1.0, 2.0, 3.5]}"#;

    fn commit(bytes: &[u8], scales: &[u32]) -> DataCommitment {
        ensure_ready().unwrap();
        generate_commitment(bytes, DatasetFormat::Json, scales).unwrap()
    }

    #[test]
    fn single_value_change_changes_the_digest() {
        let original = commit(X_ORIGINAL, &[6]);
        let mutated = commit(X_MUTATED, &[6]);
        assert_ne!(original.digest(6, "x"), mutated.digest(6, "x"));
        assert_eq!(original.digest(6, "x").unwrap().len(), 64);
    }

    #[test]
    fn every_supported_scale_is_generated() {
        let scales = supported_scales();
        let original = commit(X_ORIGINAL, &scales);
        let mutated = commit(X_MUTATED, &scales);
        assert!(original.is_complete_for_supported_scales());
        for scale in scales {
            assert_ne!(original.digest(scale, "x"), mutated.digest(scale, "x"));
        }
    }

    #[test]
    fn csv_and_json_commit_identically() {
        let from_json = commit(br#"{"x": [1.0, 2.0, 3.0], "y": [4, 5, 6]}"#, &[3, 6]);
        ensure_ready().unwrap();
        let from_csv =
            generate_commitment(b"x,y\n1,4\n2,5\n3,6\n", DatasetFormat::Csv, &[3, 6]).unwrap();
        assert_eq!(from_json, from_csv);
    }

    #[test]
    fn uninitialised_engine_is_reported() {
        let slot = EngineSlot::new();
        let dataset = parse_dataset(X_ORIGINAL, DatasetFormat::Json).unwrap();
        assert!(matches!(
            commit_dataset_in(&slot, &dataset, &[6]),
            Err(CommitmentError::EngineNotReady)
        ));
        slot.ensure_ready().unwrap();
        assert!(commit_dataset_in(&slot, &dataset, &[6]).is_ok());
    }

    #[test]
    fn unparsable_file_is_a_parse_error() {
        ensure_ready().unwrap();
        assert!(matches!(
            generate_commitment(b"[1,2,3]", DatasetFormat::Json, &[6]),
            Err(CommitmentError::Parse(_))
        ));
    }

    #[test]
    fn out_of_range_values_fail_instead_of_being_dropped() {
        ensure_ready().unwrap();
        let err = generate_commitment(br#"{"x": [1e300]}"#, DatasetFormat::Json, &[20]).unwrap_err();
        assert!(matches!(err, CommitmentError::Encode { ref column, .. } if column == "x"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn commitment_is_deterministic(values in proptest::collection::vec(-1.0e4f64..1.0e4, 0..12), scale in 1u32..=20) {
            let engine = ensure_ready().unwrap();
            let first = column_digest(engine, &values, scale).unwrap();
            let second = column_digest(engine, &values, scale).unwrap();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn commitment_is_sensitive_to_each_value(
            values in proptest::collection::vec(-1.0e4f64..1.0e4, 1..12),
            index in any::<proptest::sample::Index>(),
            scale in 1u32..=20,
        ) {
            let engine = ensure_ready().unwrap();
            let mut mutated = values.clone();
            let i = index.index(values.len());
            mutated[i] += 1.0;
            prop_assert_ne!(
                column_digest(engine, &values, scale).unwrap(),
                column_digest(engine, &mutated, scale).unwrap()
            );
        }
    }
}
