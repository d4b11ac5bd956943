//! Verification of a completed request against the committed data and the
//! agreed computation.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;
use zkdm_common::{
    assets::{bundle_asset_path, commitment_path, srs_path, PROOF_ASSETS_BUCKET},
    AssetKind, CircuitSettings, ComputationKind, DataCommitment, DatasetRecord, PrecalWitness,
    ProofFile, RequestRecord, RequestStatus,
};
use zkdm_verifier::{
    check_agreed_function, match_commitment, proven_output, verify, KeyDerivationError,
    KeyDerivationRequest, SrsSource, VerificationEngineError, VerificationKeyResolver,
};

use crate::{
    assets::AssetStore,
    error::{StateGuardViolation, StorageError, VerificationError},
};

/// Outcome of checking one request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VerificationReport {
    /// Proof accepted, proving the agreed computation and bound to the
    /// dataset commitment.
    pub verified: bool,
    pub proof_valid: bool,
    pub commitment_matched: bool,
    pub computation_matched: bool,
    /// Computation the submitted circuit proves.
    pub kind: ComputationKind,
    pub operands: Vec<String>,
    pub srs_id: String,
    pub scale: u32,
    pub proven_output: Option<f64>,
    /// Every failed check, separated by `; `.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl VerificationReport {
    fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.reason = Some(match self.reason.take() {
            Some(earlier) => format!("{earlier}; {reason}"),
            None => reason,
        });
    }
}

/// Reads reference strings from the asset store.
#[derive(Clone)]
pub struct AssetSrsSource {
    assets: AssetStore,
}

impl AssetSrsSource {
    pub fn new(assets: AssetStore) -> Self {
        Self { assets }
    }
}

#[async_trait]
impl SrsSource for AssetSrsSource {
    async fn load(&self, srs_id: &str) -> Result<Vec<u8>, KeyDerivationError> {
        self.assets
            .get(PROOF_ASSETS_BUCKET, &srs_path(srs_id))
            .await
            .map_err(|err| KeyDerivationError::ReferenceString {
                srs_id: srs_id.to_string(),
                message: err.to_string(),
            })
    }
}

/// The dataset's commitment, or `None` when it is absent or incomplete.
pub async fn load_commitment(
    assets: &AssetStore,
    dataset_id: &Uuid,
) -> Result<Option<DataCommitment>, StorageError> {
    let bytes = match assets.get(PROOF_ASSETS_BUCKET, &commitment_path(dataset_id)).await {
        Ok(bytes) => bytes,
        Err(StorageError::NotFound(_)) => return Ok(None),
        Err(err) => return Err(err),
    };
    match DataCommitment::from_json_bytes(&bytes) {
        Ok(commitment) if commitment.is_complete_for_supported_scales() => Ok(Some(commitment)),
        Ok(_) => {
            warn!(%dataset_id, "stored commitment is missing scales; treating as absent");
            Ok(None)
        }
        Err(err) => Err(StorageError::Corrupt(format!("{err:#}"))),
    }
}

#[derive(Clone)]
pub struct VerificationService {
    assets: AssetStore,
    resolver: Arc<dyn VerificationKeyResolver>,
}

impl VerificationService {
    pub fn new(assets: AssetStore, resolver: Arc<dyn VerificationKeyResolver>) -> Self {
        Self { assets, resolver }
    }

    async fn bundle_file(
        &self,
        dataset_id: &Uuid,
        request_id: &Uuid,
        kind: AssetKind,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        let path = bundle_asset_path(dataset_id, request_id, kind);
        match self.assets.get(PROOF_ASSETS_BUCKET, &path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Checks the submitted bundle of a completed (or approved) request.
    pub async fn verify_request(
        &self,
        dataset: &DatasetRecord,
        request: &RequestRecord,
    ) -> Result<VerificationReport, VerificationError> {
        let status = request.status();
        if status < RequestStatus::Completed {
            return Err(StateGuardViolation::InvalidState {
                action: "verify",
                status,
                required: RequestStatus::Completed,
            }
            .into());
        }

        let proof = self.bundle_file(&dataset.id, &request.id, AssetKind::Proof).await?;
        let witness = self
            .bundle_file(&dataset.id, &request.id, AssetKind::PrecalWitness)
            .await?;
        let settings_bytes = self
            .bundle_file(&dataset.id, &request.id, AssetKind::Settings)
            .await?;
        let (proof, witness, settings_bytes) = match (proof, witness, settings_bytes) {
            (Some(proof), Some(witness), Some(settings)) => (proof, witness, settings),
            (proof, witness, settings) => {
                let missing = [
                    (AssetKind::Proof, proof.is_none()),
                    (AssetKind::PrecalWitness, witness.is_none()),
                    (AssetKind::Settings, settings.is_none()),
                ]
                .into_iter()
                .filter_map(|(kind, absent)| absent.then_some(kind))
                .collect();
                return Err(StateGuardViolation::BundleIncomplete { missing }.into());
            }
        };

        let commitment = load_commitment(&self.assets, &dataset.id)
            .await?
            .ok_or_else(|| VerificationError::NotFound(format!("commitment for dataset {}", dataset.id)))?;

        let settings = CircuitSettings::from_bytes(&settings_bytes)
            .map_err(|err| VerificationEngineError::new("settings", format!("{err:#}")))?;
        let shape = match dataset.shape() {
            Some(shape) => shape,
            None => PrecalWitness::from_bytes(&witness)
                .ok()
                .and_then(|witness| witness.shape())
                .unwrap_or_else(|| settings.shape()),
        };

        let proven = settings
            .computation()
            .map_err(|err| VerificationEngineError::new("settings", format!("{err:#}")))?;
        let mut report = VerificationReport {
            verified: false,
            proof_valid: false,
            commitment_matched: false,
            computation_matched: false,
            kind: proven.kind,
            operands: proven.operands,
            srs_id: settings.srs_id.clone(),
            scale: settings.run_args.input_scale,
            proven_output: None,
            reason: None,
        };
        match request.srs_id.as_deref() {
            Some(recorded) if recorded == settings.srs_id => {}
            Some(recorded) => report.fail(format!(
                "settings name reference string '{}' but the result was submitted with '{recorded}'",
                settings.srs_id
            )),
            None => report.fail("no reference string was recorded with the submitted result"),
        }
        match check_agreed_function(&settings, &request.computation) {
            Ok(()) => report.computation_matched = true,
            Err(mismatch) => report.fail(mismatch.to_string()),
        }
        if report.reason.is_some() {
            warn!(
                request_id = %request.id,
                reason = report.reason.as_deref().unwrap_or_default(),
                "submitted bundle does not match the request"
            );
            return Ok(report);
        }

        let srs = self
            .assets
            .get(PROOF_ASSETS_BUCKET, &srs_path(&settings.srs_id))
            .await
            .map_err(|err| match err {
                StorageError::NotFound(_) => {
                    VerificationError::NotFound(format!("reference string '{}'", settings.srs_id))
                }
                other => other.into(),
            })?;

        let vk = self
            .resolver
            .resolve(&KeyDerivationRequest {
                shape,
                computation: request.code.clone(),
                agreed: request.computation.clone(),
                precal_witness: witness,
                settings: settings_bytes.clone(),
            })
            .await?;

        let proof_for_check = proof.clone();
        report.proof_valid = tokio::task::spawn_blocking(move || {
            verify(&proof_for_check, &settings_bytes, &vk, &srs)
        })
        .await
        .map_err(|err| VerificationEngineError::new("verifier task", err.to_string()))??;

        let instances = ProofFile::from_bytes(&proof)
            .and_then(|file| file.instances_fr())
            .map_err(|err| VerificationEngineError::new("proof instances", format!("{err:#}")))?;
        if !report.proof_valid {
            report.fail("proof rejected by the verifier");
        }
        match match_commitment(&settings, &instances, &commitment) {
            Ok(()) => report.commitment_matched = true,
            Err(mismatch) => report.fail(mismatch.to_string()),
        }
        report.proven_output = proven_output(&settings, &instances);
        report.verified =
            report.proof_valid && report.commitment_matched && report.computation_matched;

        info!(
            request_id = %request.id,
            verified = report.verified,
            proof_valid = report.proof_valid,
            commitment_matched = report.commitment_matched,
            computation = %request.computation,
            scale = report.scale,
            "request verification finished"
        );
        Ok(report)
    }
}
