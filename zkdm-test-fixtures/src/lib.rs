// zkdm/zkdm-test-fixtures/src/lib.rs

use anyhow::{Context, Result};
use halo2_proofs_axiom::poly::kzg::commitment::ParamsKZG;
use halo2curves_axiom::bn256::Bn256;
use once_cell::sync::OnceCell;
use zkdm_circuit::estimate_k;
use zkdm_commitment::{commit_dataset, parse_dataset, DatasetFormat, ParsedDataset};
use zkdm_common::{
    ensure_ready, serialize_params, supported_scales, AgreedComputation, AssetKind,
    ComputationKind, DataCommitment, DataShape,
};
use zkdm_prover::{generate_srs_seeded, prove_computation, ComputationRequest, ProofBundleFiles};

pub const SRS_ID: &str = "fixture";
pub const INPUT_SCALE: u32 = 4;
pub const DATASET_JSON: &str = r#"{"x": [1.0, 2.0, 3.0], "y": [4.0, 5.0, 6.0]}"#;
pub const MUTATED_DATASET_JSON: &str = r#"{"x": [1.0, 2.0, 3.5], "y": [4.0, 5.0, 6.0]}"#;
pub const SUM_CODE: &str = "def compute(state, x):\n    return x.sum()";
pub const SQUARES_CODE: &str = "def compute(state, x):\n    return (x * x).sum()";

const SRS_SEED: u64 = 0x7a6b_646d;

static FIXTURES: OnceCell<TestFixtures> = OnceCell::new();

/// Reference string, dataset commitments and proof bundles reused across tests.
pub struct TestFixtures {
    srs: ParamsKZG<Bn256>,
    srs_bytes: Vec<u8>,
    dataset: ParsedDataset,
    commitment: DataCommitment,
    mutated_commitment: DataCommitment,
    sum: ProofBundleFiles,
    squares: ProofBundleFiles,
    mutated_sum: ProofBundleFiles,
    relabelled: ProofBundleFiles,
}

impl TestFixtures {
    pub fn srs(&self) -> &ParamsKZG<Bn256> {
        &self.srs
    }

    pub fn srs_bytes(&self) -> &[u8] {
        &self.srs_bytes
    }

    pub fn dataset(&self) -> &ParsedDataset {
        &self.dataset
    }

    pub fn shape(&self) -> DataShape {
        self.dataset.shape()
    }

    /// Commitment to [`DATASET_JSON`] over every supported scale.
    pub fn commitment(&self) -> &DataCommitment {
        &self.commitment
    }

    /// Commitment to [`MUTATED_DATASET_JSON`] over every supported scale.
    pub fn mutated_commitment(&self) -> &DataCommitment {
        &self.mutated_commitment
    }

    /// `sum(x)` over the original dataset.
    pub fn sum_bundle(&self) -> &ProofBundleFiles {
        &self.sum
    }

    /// `sum(x * x)` over the original dataset.
    pub fn squares_bundle(&self) -> &ProofBundleFiles {
        &self.squares
    }

    /// `sum(x)` over the mutated dataset.
    pub fn mutated_sum_bundle(&self) -> &ProofBundleFiles {
        &self.mutated_sum
    }

    /// `sum(y)` over the original dataset, with settings carrying the digest
    /// of [`SQUARES_CODE`].
    pub fn relabelled_bundle(&self) -> &ProofBundleFiles {
        &self.relabelled
    }
}

/// What a consumer agrees to when submitting [`SUM_CODE`].
pub fn sum_computation() -> AgreedComputation {
    AgreedComputation::new(ComputationKind::Sum, vec!["x".to_string()])
}

/// What a consumer agrees to when submitting [`SQUARES_CODE`].
pub fn squares_computation() -> AgreedComputation {
    AgreedComputation::new(ComputationKind::SumOfSquares, vec!["x".to_string()])
}

/// Serialized files of `bundle` in `(proof, settings, witness)` order.
pub fn bundle_bytes(bundle: &ProofBundleFiles) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let file = |kind| {
        bundle
            .file_bytes(kind)
            .expect("fixture bundle files serialize")
    };
    (
        file(AssetKind::Proof),
        file(AssetKind::Settings),
        file(AssetKind::PrecalWitness),
    )
}

pub fn fixtures() -> &'static TestFixtures {
    FIXTURES.get_or_init(|| build_fixtures().expect("failed to build zkdm test fixtures"))
}

fn sum_request(code: &str, kind: ComputationKind) -> ComputationRequest {
    ComputationRequest {
        code: code.to_string(),
        kind,
        operands: vec!["x".to_string()],
        scale: INPUT_SCALE,
        input_columns: None,
    }
}

fn build_fixtures() -> Result<TestFixtures> {
    ensure_ready().context("proof engine self-test failed")?;

    let dataset = parse_dataset(DATASET_JSON.as_bytes(), DatasetFormat::Json)?;
    let mutated = parse_dataset(MUTATED_DATASET_JSON.as_bytes(), DatasetFormat::Json)?;

    let scales = supported_scales();
    let commitment = commit_dataset(&dataset, &scales)?;
    let mutated_commitment = commit_dataset(&mutated, &scales)?;

    let k = estimate_k(dataset.shape())?;
    let srs = generate_srs_seeded(k, SRS_SEED);
    let srs_bytes = serialize_params(&srs)?;

    let sum = prove_computation(
        &srs,
        SRS_ID,
        &dataset,
        &sum_request(SUM_CODE, ComputationKind::Sum),
    )?;
    let squares = prove_computation(
        &srs,
        SRS_ID,
        &dataset,
        &sum_request(SQUARES_CODE, ComputationKind::SumOfSquares),
    )?;
    let mutated_sum = prove_computation(
        &srs,
        SRS_ID,
        &mutated,
        &sum_request(SUM_CODE, ComputationKind::Sum),
    )?;

    let relabelled = prove_computation(
        &srs,
        SRS_ID,
        &dataset,
        &ComputationRequest {
            operands: vec!["y".to_string()],
            ..sum_request(SQUARES_CODE, ComputationKind::Sum)
        },
    )?;

    Ok(TestFixtures {
        srs,
        srs_bytes,
        dataset,
        commitment,
        mutated_commitment,
        sum,
        squares,
        mutated_sum,
        relabelled,
    })
}
