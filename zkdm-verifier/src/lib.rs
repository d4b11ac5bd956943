// zkdm/zkdm-verifier/src/lib.rs

pub mod commitment;
pub mod error;
pub mod resolver;

use halo2_proofs_axiom::{
    plonk::{verify_proof, VerifyingKey},
    poly::kzg::{
        commitment::{KZGCommitmentScheme, ParamsKZG},
        multiopen::VerifierGWC,
        strategy::SingleStrategy,
    },
    transcript::{Blake2bRead, Challenge255, TranscriptReadBuffer},
};
use halo2curves_axiom::bn256::{Bn256, Fr, G1Affine};
use tracing::debug;
use zkdm_common::{deserialize_verifying_key, params_for_k, CircuitSettings, ProofFile};

pub use commitment::{match_commitment, proven_output, CommitmentMismatch};
pub use error::{KeyDerivationError, VerificationEngineError};
pub use resolver::{
    check_agreed_function, check_derivation_inputs, KeyDerivationRequest, LocalKeyResolver,
    RemoteKeyResolver, SrsSource, StaticSrs, VerificationKeyResolver,
};
pub use zkdm_common::sanitize_computation;

pub fn verify_proof_bytes(
    params: &ParamsKZG<Bn256>,
    vk: &VerifyingKey<G1Affine>,
    proof_bytes: &[u8],
    instances: &[Vec<Fr>],
) -> bool {
    let mut transcript = Blake2bRead::<_, G1Affine, Challenge255<_>>::init(proof_bytes);

    let instance_columns: Vec<&[Fr]> = instances.iter().map(|col| col.as_slice()).collect();
    let prepared_instances = vec![instance_columns.as_slice()];

    verify_proof::<KZGCommitmentScheme<Bn256>, VerifierGWC<'_, Bn256>, _, _, _>(
        params,
        vk,
        SingleStrategy::new(params),
        &prepared_instances,
        &mut transcript,
    )
    .is_ok()
}

/// Verifies `model.pf` against `settings.json`, a verifying key and a
/// reference string, all as raw bytes.
///
/// Returns `Ok(false)` when the proof is rejected and an error only when an
/// input cannot be decoded. CPU bound; async callers should run it on a
/// blocking thread.
pub fn verify(
    proof: &[u8],
    settings: &[u8],
    vk: &[u8],
    srs: &[u8],
) -> Result<bool, VerificationEngineError> {
    let settings = CircuitSettings::from_bytes(settings)
        .map_err(|err| VerificationEngineError::new("settings", format!("{err:#}")))?;
    let proof_file = ProofFile::from_bytes(proof)
        .map_err(|err| VerificationEngineError::new("proof", format!("{err:#}")))?;
    let instances = proof_file
        .instances_fr()
        .map_err(|err| VerificationEngineError::new("proof instances", format!("{err:#}")))?;
    let proof_bytes = proof_file
        .proof_bytes()
        .map_err(|err| VerificationEngineError::new("proof", format!("{err:#}")))?;

    let expected = settings.circuit.instance_len();
    if instances.len() != 1 || instances[0].len() != expected {
        return Err(VerificationEngineError::new(
            "proof instances",
            format!("settings expect a single column of {expected} value(s)"),
        ));
    }

    let params = params_for_k(srs, settings.circuit.k())
        .map_err(|err| VerificationEngineError::new("reference string", format!("{err:#}")))?;
    let vk = deserialize_verifying_key(vk, &settings.circuit)
        .map_err(|err| VerificationEngineError::new("verifying key", format!("{err:#}")))?;

    let accepted = verify_proof_bytes(&params, &vk, &proof_bytes, &instances);
    debug!(accepted, k = settings.circuit.k(), "proof verification finished");
    Ok(accepted)
}
