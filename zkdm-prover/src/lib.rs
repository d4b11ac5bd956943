// zkdm/zkdm-prover/src/lib.rs

//! Owner-side reference prover.
//!
//! Runs one of the built-in column computations over a local dataset and
//! emits the proof bundle (`model.pf`, `precal_witness.json`,
//! `settings.json`) together with the verifying key it was produced under.

use anyhow::{anyhow, bail, ensure, Context, Result};
use halo2_proofs_axiom::{
    plonk::{self, create_proof, keygen_pk, keygen_vk},
    poly::{
        commitment::Params,
        kzg::{
            commitment::{KZGCommitmentScheme, ParamsKZG},
            multiopen::ProverGWC,
        },
    },
    transcript::{Blake2bWrite, Challenge255, TranscriptWriterBuffer},
};
use halo2curves_axiom::bn256::{Bn256, Fr, G1Affine};
use rand::{rngs::OsRng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tracing::info;

use zkdm_circuit::{public_instances, ComputationCircuit, ComputationCircuitParams};
use zkdm_commitment::{encode_column, ParsedDataset};
use zkdm_common::{
    assets::AssetKind, computation_digest, decode_scaled, ensure_ready, serialize_verifying_key,
    CircuitSettings, ComputationKind, DataShape, PrecalWitness, ProofFile, RunArgs,
};

pub struct ProverKeys {
    pub vk: plonk::VerifyingKey<G1Affine>,
    pub pk: plonk::ProvingKey<G1Affine>,
}

/// Generates a reference string from OS randomness.
pub fn generate_srs(k: u32) -> ParamsKZG<Bn256> {
    ParamsKZG::<Bn256>::setup(k, OsRng)
}

/// Deterministic reference string; only suitable for tests and local demos.
pub fn generate_srs_seeded(k: u32, seed: u64) -> ParamsKZG<Bn256> {
    ParamsKZG::<Bn256>::setup(k, ChaCha20Rng::seed_from_u64(seed))
}

/// Copy of `srs` sized for a circuit of `2^k` rows.
pub fn params_for_circuit(srs: &ParamsKZG<Bn256>, k: u32) -> Result<ParamsKZG<Bn256>> {
    ensure!(
        srs.k() >= k,
        "reference string supports k = {} but the circuit needs k = {}",
        srs.k(),
        k
    );
    let mut params = srs.clone();
    if params.k() > k {
        params.downsize(k);
    }
    Ok(params)
}

pub fn keygen(
    params: &ParamsKZG<Bn256>,
    circuit_params: &ComputationCircuitParams,
) -> Result<ProverKeys> {
    let empty_circuit = ComputationCircuit::keygen(circuit_params.clone());
    let vk = keygen_vk(params, &empty_circuit)
        .map_err(|err| anyhow!("verifying key generation failed: {err:?}"))?;
    let pk = keygen_pk(params, vk.clone(), &empty_circuit)
        .map_err(|err| anyhow!("proving key generation failed: {err:?}"))?;
    Ok(ProverKeys { vk, pk })
}

pub fn prove(
    params: &ParamsKZG<Bn256>,
    pk: &plonk::ProvingKey<G1Affine>,
    circuit: ComputationCircuit,
    instances: &[Vec<Fr>],
) -> Result<Vec<u8>> {
    let instance_refs: Vec<&[Fr]> = instances.iter().map(|col| col.as_slice()).collect();

    let mut transcript = Blake2bWrite::<_, G1Affine, Challenge255<_>>::init(vec![]);
    create_proof::<KZGCommitmentScheme<Bn256>, ProverGWC<'_, Bn256>, _, _, _, _>(
        params,
        pk,
        &[circuit],
        &[instance_refs.as_slice()],
        OsRng,
        &mut transcript,
    )
    .map_err(|err| anyhow!("proof generation failed: {err:?}"))?;
    Ok(transcript.finalize())
}

/// What the owner agreed to compute.
#[derive(Clone, Debug)]
pub struct ComputationRequest {
    /// Computation text as submitted with the request.
    pub code: String,
    pub kind: ComputationKind,
    /// Operand column names, `kind.arity()` of them.
    pub operands: Vec<String>,
    /// Quantisation scale of the inputs.
    pub scale: u32,
    /// Columns bound into the proof, in instance order. Defaults to every
    /// dataset column.
    pub input_columns: Option<Vec<String>>,
}

/// A complete proof bundle plus the key and output it was produced with.
#[derive(Clone, Debug)]
pub struct ProofBundleFiles {
    pub proof: ProofFile,
    pub settings: CircuitSettings,
    pub witness: PrecalWitness,
    pub vk: Vec<u8>,
    pub output: f64,
}

impl ProofBundleFiles {
    pub fn file_bytes(&self, kind: AssetKind) -> Result<Vec<u8>> {
        match kind {
            AssetKind::Proof => self.proof.to_bytes(),
            AssetKind::PrecalWitness => self.witness.to_bytes(),
            AssetKind::Settings => self.settings.to_bytes(),
        }
    }
}

pub fn prove_computation(
    srs: &ParamsKZG<Bn256>,
    srs_id: &str,
    dataset: &ParsedDataset,
    request: &ComputationRequest,
) -> Result<ProofBundleFiles> {
    let engine = ensure_ready().context("failed to initialise proof engine")?;

    let input_columns = request
        .input_columns
        .clone()
        .unwrap_or_else(|| dataset.names().map(str::to_string).collect());
    ensure!(!input_columns.is_empty(), "no input columns selected");

    let mut raw_columns = Vec::with_capacity(input_columns.len());
    for name in &input_columns {
        let values = dataset
            .column(name)
            .with_context(|| format!("dataset has no column '{name}'"))?;
        raw_columns.push(values);
    }
    let rows = raw_columns[0].len();
    if let Some((name, values)) = input_columns
        .iter()
        .zip(&raw_columns)
        .find(|(_, values)| values.len() != rows)
    {
        bail!(
            "column '{name}' has {} numeric value(s) but '{}' has {rows}",
            values.len(),
            input_columns[0]
        );
    }

    let encoded = raw_columns
        .iter()
        .map(|values| encode_column(values, request.scale))
        .collect::<Result<Vec<_>, _>>()
        .context("failed to encode inputs")?;

    let operands = request
        .operands
        .iter()
        .map(|name| {
            input_columns
                .iter()
                .position(|column| column == name)
                .with_context(|| format!("operand '{name}' is not an input column"))
        })
        .collect::<Result<Vec<_>>>()?;

    let shape = DataShape::new(rows, input_columns.len());
    let circuit_params = ComputationCircuitParams::new(shape, request.kind, operands)?;
    let params = params_for_circuit(srs, circuit_params.k())?;

    let instances = public_instances(&circuit_params, engine.spec(), &encoded)?;
    let keys = keygen(&params, &circuit_params)?;
    let circuit = ComputationCircuit::new(circuit_params.clone(), encoded.clone())?;
    let proof = prove(&params, &keys.pk, circuit, &instances)?;

    let values = &instances[0];
    let (digests, output) = values.split_at(values.len() - 1);
    let settings = CircuitSettings {
        run_args: RunArgs {
            input_scale: request.scale,
        },
        circuit: circuit_params,
        input_columns,
        computation_digest: computation_digest(&request.code),
        srs_id: srs_id.to_string(),
    };
    let output_value = decode_scaled(&output[0], settings.output_scale())
        .context("computation output does not fit the fixed-point range")?;

    info!(
        kind = %request.kind,
        shape = %shape,
        k = settings.circuit.k(),
        output = output_value,
        "generated computation proof"
    );

    Ok(ProofBundleFiles {
        proof: ProofFile::new(&instances, &proof),
        witness: PrecalWitness::new(&encoded, output, digests),
        vk: serialize_verifying_key(&keys.vk)?,
        settings,
        output: output_value,
    })
}
