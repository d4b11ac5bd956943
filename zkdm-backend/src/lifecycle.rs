//! Request lifecycle state machine.
//!
//! `AwaitingConfirmation -> Accepted -> Completed -> Approved`, with no
//! backward moves and no skips. Every transition reads the request, checks
//! its guard and writes back with a version compare-and-swap. A lost race
//! re-reads and re-checks the guard, so a transition never lands on a state
//! its guard was not checked against.

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;
use zkdm_common::{
    assets::{bundle_asset_path, is_valid_srs_id, PROOF_ASSETS_BUCKET},
    AgreedComputation, AssetKind, ComputationResult, DatasetRecord, RequestRecord,
    RequestStatus,
};

use crate::{
    assets::AssetStore,
    error::{LifecycleError, StateGuardViolation},
    records::RecordStore,
};

/// Which bundle files are currently present in the asset store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct BundlePresence {
    pub proof: bool,
    pub precal_witness: bool,
    pub settings: bool,
}

impl BundlePresence {
    pub fn get(&self, kind: AssetKind) -> bool {
        match kind {
            AssetKind::Proof => self.proof,
            AssetKind::PrecalWitness => self.precal_witness,
            AssetKind::Settings => self.settings,
        }
    }

    fn set(&mut self, kind: AssetKind, present: bool) {
        match kind {
            AssetKind::Proof => self.proof = present,
            AssetKind::PrecalWitness => self.precal_witness = present,
            AssetKind::Settings => self.settings = present,
        }
    }

    pub fn missing(&self) -> Vec<AssetKind> {
        AssetKind::ALL
            .into_iter()
            .filter(|kind| !self.get(*kind))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }
}

/// Owner's submission of a finished computation.
#[derive(Clone, Debug)]
pub struct ResultSubmission {
    pub result: Option<ComputationResult>,
    pub srs_id: String,
    /// Bundle files uploaded before the presence check.
    pub files: Vec<(AssetKind, Vec<u8>)>,
}

/// Fields a consumer supplies when opening a request.
#[derive(Clone, Debug)]
pub struct NewRequest {
    pub title: String,
    pub description: String,
    pub code: String,
    pub computation: AgreedComputation,
    pub username: Option<String>,
}

#[derive(Clone)]
pub struct RequestLifecycle {
    records: RecordStore,
    assets: AssetStore,
    attempts: u32,
}

impl RequestLifecycle {
    pub fn new(records: RecordStore, assets: AssetStore, attempts: u32) -> Self {
        Self {
            records,
            assets,
            attempts: attempts.max(1),
        }
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn dataset(&self, dataset_id: &Uuid) -> Result<DatasetRecord, LifecycleError> {
        self.records
            .dataset(dataset_id)?
            .ok_or_else(|| LifecycleError::NotFound(format!("dataset {dataset_id}")))
    }

    /// Loads a request together with its dataset. A request filed against a
    /// different dataset is reported as not found.
    pub fn load(
        &self,
        dataset_id: &Uuid,
        request_id: &Uuid,
    ) -> Result<(DatasetRecord, RequestRecord), LifecycleError> {
        let dataset = self.dataset(dataset_id)?;
        let request = self
            .records
            .request(request_id)?
            .filter(|request| request.dataset_id == *dataset_id)
            .ok_or_else(|| LifecycleError::NotFound(format!("request {request_id}")))?;
        Ok((dataset, request))
    }

    pub fn create_request(
        &self,
        actor: &str,
        dataset_id: &Uuid,
        new: NewRequest,
    ) -> Result<RequestRecord, LifecycleError> {
        self.dataset(dataset_id)?;
        new.computation
            .validate()
            .map_err(LifecycleError::InvalidInput)?;
        let now = Utc::now();
        let record = RequestRecord {
            id: Uuid::new_v4(),
            title: new.title,
            description: new.description,
            user_id: actor.to_string(),
            dataset_id: *dataset_id,
            code: new.code,
            computation: new.computation,
            result: None,
            is_accepted: false,
            is_completed: false,
            result_approved: false,
            created_at: now,
            updated_at: now,
            username: new.username,
            srs_id: None,
            version: 0,
        };
        self.records.insert_request(record.clone())?;
        info!(request_id = %record.id, dataset_id = %dataset_id, "request created");
        Ok(record)
    }

    pub async fn bundle_presence(&self, dataset_id: &Uuid, request_id: &Uuid) -> BundlePresence {
        let mut presence = BundlePresence::default();
        for kind in AssetKind::ALL {
            let path = bundle_asset_path(dataset_id, request_id, kind);
            presence.set(kind, self.assets.exists(PROOF_ASSETS_BUCKET, &path).await);
        }
        presence
    }

    /// Accept is the owner's confirmation. Accepting an already accepted
    /// request returns it unchanged.
    pub async fn accept(
        &self,
        actor: &str,
        dataset_id: &Uuid,
        request_id: &Uuid,
    ) -> Result<RequestRecord, LifecycleError> {
        self.transition(dataset_id, request_id, "accept", |dataset, request| {
            accept_guard(actor, dataset, request)
        })
        .await
    }

    /// Stores one bundle file. Only the owner may upload, and only while
    /// the request is accepted and not yet completed.
    pub async fn upload_bundle_asset(
        &self,
        actor: &str,
        dataset_id: &Uuid,
        request_id: &Uuid,
        kind: AssetKind,
        bytes: Vec<u8>,
    ) -> Result<(), LifecycleError> {
        let (dataset, request) = self.load(dataset_id, request_id)?;
        require_owner(actor, &dataset, "upload proof assets for")?;
        require_status(&request, "upload proof assets for", RequestStatus::Accepted)?;

        let path = bundle_asset_path(dataset_id, request_id, kind);
        self.assets.put(PROOF_ASSETS_BUCKET, &path, bytes).await?;
        info!(%request_id, asset = %kind, "bundle asset uploaded");
        Ok(())
    }

    /// Moves an accepted request to completed once the result is supplied
    /// and every bundle file is present. Files carried by the submission are
    /// written first, so repeating a partially failed submission completes
    /// the upload.
    pub async fn submit_result(
        &self,
        actor: &str,
        dataset_id: &Uuid,
        request_id: &Uuid,
        submission: ResultSubmission,
    ) -> Result<RequestRecord, LifecycleError> {
        let (dataset, request) = self.load(dataset_id, request_id)?;
        require_owner(actor, &dataset, "submit a result for")?;
        require_status(&request, "submit a result for", RequestStatus::Accepted)?;

        let result = match submission.result {
            Some(result) if !result.is_empty() => result,
            _ => return Err(reject(request_id, StateGuardViolation::MissingResult)),
        };
        if !is_valid_srs_id(&submission.srs_id) {
            return Err(reject(
                request_id,
                StateGuardViolation::InvalidSrsId(submission.srs_id),
            ));
        }

        for (kind, bytes) in submission.files {
            let path = bundle_asset_path(dataset_id, request_id, kind);
            self.assets.put(PROOF_ASSETS_BUCKET, &path, bytes).await?;
        }

        let presence = self.bundle_presence(dataset_id, request_id).await;
        if !presence.is_complete() {
            return Err(reject(
                request_id,
                StateGuardViolation::BundleIncomplete {
                    missing: presence.missing(),
                },
            ));
        }

        let srs_id = submission.srs_id;
        self.transition(dataset_id, request_id, "submit a result for", |dataset, request| {
            require_owner(actor, dataset, "submit a result for")?;
            require_status(request, "submit a result for", RequestStatus::Accepted)?;
            let mut updated = request.clone();
            updated.result = Some(result.clone());
            updated.srs_id = Some(srs_id.clone());
            updated.is_completed = true;
            Ok(Some(updated))
        })
        .await
    }

    /// Checks who may approve without changing anything.
    pub fn check_approve(
        &self,
        actor: &str,
        dataset_id: &Uuid,
        request_id: &Uuid,
    ) -> Result<(DatasetRecord, RequestRecord), LifecycleError> {
        let (dataset, request) = self.load(dataset_id, request_id)?;
        approve_guard(actor, &request).map_err(|violation| reject(request_id, violation))?;
        Ok((dataset, request))
    }

    pub async fn approve(
        &self,
        actor: &str,
        dataset_id: &Uuid,
        request_id: &Uuid,
    ) -> Result<RequestRecord, LifecycleError> {
        self.transition(dataset_id, request_id, "approve", |_, request| {
            approve_guard(actor, request)
        })
        .await
    }

    async fn transition<F>(
        &self,
        dataset_id: &Uuid,
        request_id: &Uuid,
        action: &'static str,
        mut apply: F,
    ) -> Result<RequestRecord, LifecycleError>
    where
        F: FnMut(&DatasetRecord, &RequestRecord) -> Result<Option<RequestRecord>, StateGuardViolation>,
    {
        for _ in 0..self.attempts {
            let (dataset, current) = self.load(dataset_id, request_id)?;
            let updated = match apply(&dataset, &current) {
                Ok(Some(updated)) => updated,
                Ok(None) => return Ok(current),
                Err(violation) => return Err(reject(request_id, violation)),
            };
            let from = current.status();
            if let Some(stored) = self.records.compare_and_swap_request(&current, updated)? {
                info!(
                    %request_id,
                    action,
                    from = ?from,
                    to = ?stored.status(),
                    version = stored.version,
                    "request transitioned"
                );
                return Ok(stored);
            }
        }
        Err(reject(
            request_id,
            StateGuardViolation::Contended {
                attempts: self.attempts,
            },
        ))
    }
}

fn reject(request_id: &Uuid, violation: StateGuardViolation) -> LifecycleError {
    warn!(%request_id, reason = %violation, "lifecycle guard rejected transition");
    LifecycleError::Guard(violation)
}

fn require_owner(
    actor: &str,
    dataset: &DatasetRecord,
    action: &'static str,
) -> Result<(), StateGuardViolation> {
    if dataset.owner_id != actor {
        return Err(StateGuardViolation::NotPermitted {
            actor: actor.to_string(),
            action,
        });
    }
    Ok(())
}

fn require_status(
    request: &RequestRecord,
    action: &'static str,
    required: RequestStatus,
) -> Result<(), StateGuardViolation> {
    let status = request.status();
    if status != required {
        return Err(StateGuardViolation::InvalidState {
            action,
            status,
            required,
        });
    }
    Ok(())
}

fn accept_guard(
    actor: &str,
    dataset: &DatasetRecord,
    request: &RequestRecord,
) -> Result<Option<RequestRecord>, StateGuardViolation> {
    require_owner(actor, dataset, "accept")?;
    if request.status() >= RequestStatus::Accepted {
        return Ok(None);
    }
    let mut updated = request.clone();
    updated.is_accepted = true;
    Ok(Some(updated))
}

fn approve_guard(
    actor: &str,
    request: &RequestRecord,
) -> Result<Option<RequestRecord>, StateGuardViolation> {
    if request.user_id != actor {
        return Err(StateGuardViolation::NotPermitted {
            actor: actor.to_string(),
            action: "approve",
        });
    }
    require_status(request, "approve", RequestStatus::Completed)?;
    let mut updated = request.clone();
    updated.result_approved = true;
    Ok(Some(updated))
}
