// zkdm/zkdm-common/src/artifacts.rs

use std::{collections::BTreeMap, ops::RangeInclusive};

use anyhow::{ensure, Context, Result};
use halo2curves_axiom::bn256::Fr;
use serde::{Deserialize, Serialize};
use zkdm_circuit::{ComputationCircuitParams, DataShape};

use crate::{fr_from_hex, fr_to_hex, model::AgreedComputation};

/// Quantisation scales every commitment is generated for.
pub const SUPPORTED_SCALES: RangeInclusive<u32> = 1..=20;
pub const TRANSCRIPT_BLAKE2B: &str = "blake2b";

pub fn supported_scales() -> Vec<u32> {
    SUPPORTED_SCALES.collect()
}

/// Per-scale, per-column digests of a dataset: `{ scale: { column: digest } }`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataCommitment(BTreeMap<u32, BTreeMap<String, String>>);

impl DataCommitment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, scale: u32, column: impl Into<String>, digest: impl Into<String>) {
        self.0
            .entry(scale)
            .or_default()
            .insert(column.into(), digest.into());
    }

    pub fn digest(&self, scale: u32, column: &str) -> Option<&str> {
        self.0
            .get(&scale)
            .and_then(|columns| columns.get(column))
            .map(String::as_str)
    }

    pub fn scales(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.keys().copied()
    }

    pub fn columns(&self, scale: u32) -> Vec<&str> {
        self.0
            .get(&scale)
            .map(|columns| columns.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// True when every scale in `scales` is present and all of them commit to
    /// the same non-empty column set.
    pub fn is_complete(&self, scales: impl IntoIterator<Item = u32>) -> bool {
        let mut reference: Option<Vec<&String>> = None;
        for scale in scales {
            let Some(columns) = self.0.get(&scale) else {
                return false;
            };
            let names: Vec<&String> = columns.keys().collect();
            if names.is_empty() {
                return false;
            }
            match &reference {
                Some(expected) if *expected != names => return false,
                Some(_) => {}
                None => reference = Some(names),
            }
        }
        reference.is_some()
    }

    pub fn is_complete_for_supported_scales(&self) -> bool {
        self.is_complete(SUPPORTED_SCALES)
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("failed to serialize data commitment")
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("failed to parse data commitment json")
    }
}

/// `model.pf`: public instances and proof transcript, both hex encoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofFile {
    pub instances: Vec<Vec<String>>,
    pub proof: String,
    #[serde(default = "default_transcript")]
    pub transcript_type: String,
}

fn default_transcript() -> String {
    TRANSCRIPT_BLAKE2B.to_string()
}

impl ProofFile {
    pub fn new(instances: &[Vec<Fr>], proof: &[u8]) -> Self {
        Self {
            instances: instances
                .iter()
                .map(|column| column.iter().map(fr_to_hex).collect())
                .collect(),
            proof: hex::encode(proof),
            transcript_type: default_transcript(),
        }
    }

    pub fn instances_fr(&self) -> Result<Vec<Vec<Fr>>> {
        self.instances
            .iter()
            .map(|column| column.iter().map(|v| fr_from_hex(v)).collect())
            .collect()
    }

    pub fn proof_bytes(&self) -> Result<Vec<u8>> {
        hex::decode(&self.proof).context("proof is not valid hex")
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("failed to serialize proof file")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let file: Self = serde_json::from_slice(bytes).context("failed to parse proof file")?;
        ensure!(
            file.transcript_type == TRANSCRIPT_BLAKE2B,
            "unsupported transcript type '{}'",
            file.transcript_type
        );
        Ok(file)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunArgs {
    pub input_scale: u32,
}

/// `settings.json`: everything a verifier needs besides the proof, the key
/// and the reference string.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CircuitSettings {
    pub run_args: RunArgs,
    pub circuit: ComputationCircuitParams,
    /// Dataset column names, in the order their digests appear in the proof instances.
    pub input_columns: Vec<String>,
    pub computation_digest: String,
    pub srs_id: String,
}

impl CircuitSettings {
    pub fn output_scale(&self) -> u32 {
        self.run_args.input_scale * self.circuit.kind.degree()
    }

    pub fn shape(&self) -> DataShape {
        self.circuit.shape
    }

    /// The computation the circuit actually proves, with operand indices
    /// resolved to input column names.
    pub fn computation(&self) -> Result<AgreedComputation> {
        let operands = self
            .circuit
            .operands
            .iter()
            .map(|&index| {
                self.input_columns.get(index).cloned().with_context(|| {
                    format!("operand index {index} is outside the input columns")
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(AgreedComputation::new(self.circuit.kind, operands))
    }

    pub fn validate(&self) -> Result<()> {
        self.circuit
            .validate()
            .context("settings describe an invalid circuit")?;
        ensure!(
            SUPPORTED_SCALES.contains(&self.run_args.input_scale),
            "input scale {} is not supported",
            self.run_args.input_scale
        );
        ensure!(
            self.input_columns.len() == self.circuit.shape.columns,
            "settings list {} input column(s) for a shape with {}",
            self.input_columns.len(),
            self.circuit.shape.columns
        );
        ensure!(!self.srs_id.is_empty(), "settings do not name a reference string");
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).context("failed to serialize settings")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let settings: Self = serde_json::from_slice(bytes).context("failed to parse settings")?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedInputs {
    pub poseidon_hash: Vec<String>,
}

/// `precal_witness.json`: encoded inputs and outputs of a proving run plus the
/// digests of the inputs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecalWitness {
    pub inputs: Vec<Vec<String>>,
    pub outputs: Vec<Vec<String>>,
    pub processed_inputs: ProcessedInputs,
}

impl PrecalWitness {
    pub fn new(inputs: &[Vec<Fr>], outputs: &[Fr], input_digests: &[Fr]) -> Self {
        Self {
            inputs: inputs
                .iter()
                .map(|column| column.iter().map(fr_to_hex).collect())
                .collect(),
            outputs: vec![outputs.iter().map(fr_to_hex).collect()],
            processed_inputs: ProcessedInputs {
                poseidon_hash: input_digests.iter().map(fr_to_hex).collect(),
            },
        }
    }

    /// Shape of the witnessed data; `None` for ragged inputs.
    pub fn shape(&self) -> Option<DataShape> {
        let rows = self.inputs.first().map(Vec::len)?;
        self.inputs
            .iter()
            .all(|column| column.len() == rows)
            .then(|| DataShape::new(rows, self.inputs.len()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("failed to serialize precal witness")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("failed to parse precal witness")
    }
}
