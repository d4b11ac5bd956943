// zkdm/zkdm-common/src/lib.rs

pub mod artifacts;
pub mod assets;
pub mod engine;
pub mod model;
pub mod sanitize;

use std::io::Cursor;

use anyhow::{anyhow, ensure, Context, Result};
use halo2_proofs_axiom::{
    plonk,
    poly::{commitment::Params, kzg::commitment::ParamsKZG},
    SerdeFormat,
};
use halo2curves_axiom::{
    bn256::{Bn256, Fr, G1Affine},
    ff::PrimeField,
};
use zkdm_circuit::{ComputationCircuit, ComputationCircuitParams};

pub use artifacts::{
    supported_scales, CircuitSettings, DataCommitment, PrecalWitness, ProcessedInputs, ProofFile,
    RunArgs, SUPPORTED_SCALES,
};
pub use assets::AssetKind;
pub use engine::{
    canonical_sequence, decode_scaled, encode_scaled, engine, ensure_ready, fr_to_i128,
    EngineError, EngineSlot, ProofEngine,
};
pub use model::{
    AgreedComputation, ComputationResult, DatasetRecord, RequestRecord, RequestStatus,
};
pub use sanitize::sanitize_computation;
pub use zkdm_circuit::{
    ComputationKind, DataShape, POSEIDON_FULL_ROUNDS, POSEIDON_PARTIAL_ROUNDS, POSEIDON_RATE,
    POSEIDON_T,
};

pub fn serialize_params(params: &ParamsKZG<Bn256>) -> Result<Vec<u8>> {
    let mut buf = vec![];
    params
        .write(&mut buf)
        .context("failed to serialize KZG params")?;
    Ok(buf)
}

pub fn deserialize_params(bytes: &[u8]) -> Result<ParamsKZG<Bn256>> {
    let mut reader = Cursor::new(bytes);
    ParamsKZG::<Bn256>::read(&mut reader).context("failed to deserialize KZG params")
}

/// Loads a reference string and shrinks it to `k` if it was generated larger.
pub fn params_for_k(srs: &[u8], k: u32) -> Result<ParamsKZG<Bn256>> {
    let mut params = deserialize_params(srs)?;
    ensure!(
        params.k() >= k,
        "reference string supports k = {} but the circuit needs k = {}",
        params.k(),
        k
    );
    if params.k() > k {
        params.downsize(k);
    }
    Ok(params)
}

pub fn serialize_verifying_key(vk: &plonk::VerifyingKey<G1Affine>) -> Result<Vec<u8>> {
    let mut buf = vec![];
    vk.write(&mut buf, SerdeFormat::Processed)
        .context("failed to serialize verifying key")?;
    Ok(buf)
}

pub fn deserialize_verifying_key(
    bytes: &[u8],
    params: &ComputationCircuitParams,
) -> Result<plonk::VerifyingKey<G1Affine>> {
    let mut reader = Cursor::new(bytes);
    plonk::VerifyingKey::read::<_, ComputationCircuit>(
        &mut reader,
        SerdeFormat::Processed,
        params.clone(),
    )
    .context("failed to deserialize verifying key")
}

pub fn hash_bytes_hex(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Binding between a proof and the computation text it claims to run.
pub fn computation_digest(code: &str) -> String {
    hash_bytes_hex(sanitize_computation(code).as_bytes())
}

pub fn fr_from_bytes(bytes: &[u8; 32]) -> Result<Fr> {
    Fr::from_bytes(bytes)
        .into_option()
        .ok_or_else(|| anyhow!("invalid bn256 scalar encoding"))
}

pub fn fr_to_bytes(fr: &Fr) -> [u8; 32] {
    let repr = fr.to_repr();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(repr.as_ref());
    bytes
}

/// Lowercase hex of the little-endian representation.
pub fn fr_to_hex(fr: &Fr) -> String {
    hex::encode(fr_to_bytes(fr))
}

pub fn fr_from_hex(value: &str) -> Result<Fr> {
    let raw = hex::decode(value.trim_start_matches("0x"))
        .with_context(|| format!("invalid field element hex '{value}'"))?;
    let bytes: [u8; 32] = raw
        .try_into()
        .map_err(|raw: Vec<u8>| anyhow!("field element must be 32 bytes, got {}", raw.len()))?;
    fr_from_bytes(&bytes)
}
