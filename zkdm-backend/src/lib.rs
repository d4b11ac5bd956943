// zkdm/zkdm-backend/src/lib.rs

pub mod assets;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod notebook;
pub mod records;
pub mod verification;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    async_trait,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, FromRequestParts, Path as AxumPath, Query, State},
    http::{header, request::Parts, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;
use zkdm_common::{
    assets::{
        commitment_path, is_valid_srs_id, notebook_path, srs_path, verifier_notebook_path,
        COMPUTATIONS_BUCKET, PROOF_ASSETS_BUCKET,
    },
    deserialize_params, fr_from_hex, supported_scales, AgreedComputation, AssetKind,
    ComputationKind, ComputationResult, DataCommitment, DatasetRecord, EngineError,
    RequestRecord, RequestStatus,
    POSEIDON_FULL_ROUNDS, POSEIDON_PARTIAL_ROUNDS, POSEIDON_RATE, POSEIDON_T,
};
use zkdm_verifier::{
    KeyDerivationError, LocalKeyResolver, RemoteKeyResolver, VerificationKeyResolver,
};

use crate::{
    assets::AssetStore,
    config::{AssetBackendKind, RecordBackendKind, ServiceConfig},
    error::{LifecycleError, NotebookError, StateGuardViolation, StorageError, VerificationError},
    lifecycle::{BundlePresence, NewRequest, RequestLifecycle, ResultSubmission},
    notebook::{ComputeArtifactGenerator, TemplateNotebookGenerator},
    records::RecordStore,
    verification::{load_commitment, AssetSrsSource, VerificationReport, VerificationService},
};

const USER_HEADER: &str = "x-user-id";
const NOTEBOOK_CONTENT_TYPE: &str = "application/x-ipynb+json";
/// Reference strings for large circuits run to hundreds of megabytes.
const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

const CODE_PARSE: &str = "PARSE_ERROR";
const CODE_ENGINE_NOT_READY: &str = "ENGINE_NOT_READY";
const CODE_STORAGE: &str = "STORAGE_ERROR";
const CODE_KEY_DERIVATION: &str = "KEY_DERIVATION_ERROR";
const CODE_VERIFICATION_ENGINE: &str = "VERIFICATION_ENGINE_ERROR";
const CODE_STATE_GUARD: &str = "STATE_GUARD_VIOLATION";
const CODE_NOT_FOUND: &str = "NOT_FOUND";
const CODE_UNAUTHENTICATED: &str = "UNAUTHENTICATED";
const CODE_INTERNAL: &str = "INTERNAL_SERVER_ERROR";

#[derive(Clone)]
pub struct AppState {
    config: Arc<ServiceConfig>,
    assets: AssetStore,
    lifecycle: RequestLifecycle,
    verification: VerificationService,
    notebooks: Arc<dyn ComputeArtifactGenerator>,
}

impl AppState {
    /// Builds the stores and key resolver named by `config`.
    pub fn from_config(config: ServiceConfig) -> anyhow::Result<Self> {
        let records = match config.record_backend {
            RecordBackendKind::Memory => RecordStore::in_memory(),
            RecordBackendKind::Sled => RecordStore::persistent(&config.record_db)?,
        };
        let assets = match config.asset_backend {
            AssetBackendKind::Memory => AssetStore::in_memory(),
            AssetBackendKind::Sled => AssetStore::persistent(&config.asset_db)?,
            AssetBackendKind::Remote => {
                let url = config
                    .storage_url
                    .clone()
                    .context("remote asset backend needs a storage url")?;
                AssetStore::remote(url, config.storage_key.clone())?
            }
        };
        let resolver: Arc<dyn VerificationKeyResolver> = match &config.vk_service_url {
            Some(url) => Arc::new(RemoteKeyResolver::new(url.clone(), config.vk_service_timeout)?),
            None => Arc::new(LocalKeyResolver::new(AssetSrsSource::new(assets.clone()))),
        };
        let notebooks = Arc::new(TemplateNotebookGenerator::bundled()?);
        Ok(Self::with_components(config, records, assets, resolver, notebooks))
    }

    pub fn with_components(
        config: ServiceConfig,
        records: RecordStore,
        assets: AssetStore,
        resolver: Arc<dyn VerificationKeyResolver>,
        notebooks: Arc<dyn ComputeArtifactGenerator>,
    ) -> Self {
        let lifecycle = RequestLifecycle::new(records, assets.clone(), config.transition_attempts);
        let verification = VerificationService::new(assets.clone(), resolver);
        Self {
            config: Arc::new(config),
            assets,
            lifecycle,
            verification,
            notebooks,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn assets(&self) -> &AssetStore {
        &self.assets
    }

    pub fn lifecycle(&self) -> &RequestLifecycle {
        &self.lifecycle
    }

    pub fn verification(&self) -> &VerificationService {
        &self.verification
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn parse(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, CODE_PARSE, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, CODE_NOT_FOUND, message)
    }

    fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, CODE_STATE_GUARD, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, CODE_INTERNAL, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    error_code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.message,
            error_code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => ApiError::not_found(err.to_string()),
            StorageError::InvalidPath(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, CODE_STORAGE, err.to_string())
            }
            StorageError::Corrupt(_) | StorageError::Backend(_) => {
                ApiError::new(StatusCode::BAD_GATEWAY, CODE_STORAGE, err.to_string())
            }
        }
    }
}

impl From<StateGuardViolation> for ApiError {
    fn from(violation: StateGuardViolation) -> Self {
        let status = match violation {
            StateGuardViolation::NotPermitted { .. } => StatusCode::FORBIDDEN,
            _ => StatusCode::CONFLICT,
        };
        ApiError::new(status, CODE_STATE_GUARD, violation.to_string())
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::NotFound(what) => ApiError::not_found(format!("{what} not found")),
            LifecycleError::InvalidInput(message) => ApiError::parse(message),
            LifecycleError::Guard(violation) => violation.into(),
            LifecycleError::Storage(err) => err.into(),
        }
    }
}

impl From<KeyDerivationError> for ApiError {
    fn from(err: KeyDerivationError) -> Self {
        let status = match err {
            KeyDerivationError::Service(_) => StatusCode::BAD_GATEWAY,
            KeyDerivationError::Keygen(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        };
        ApiError::new(
            status,
            CODE_KEY_DERIVATION,
            format!("verification failed: {err}"),
        )
    }
}

impl From<VerificationError> for ApiError {
    fn from(err: VerificationError) -> Self {
        match err {
            VerificationError::NotFound(what) => ApiError::not_found(format!("{what} not found")),
            VerificationError::Guard(violation) => violation.into(),
            VerificationError::Storage(err) => err.into(),
            VerificationError::KeyDerivation(err) => err.into(),
            VerificationError::Engine(err) => ApiError::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                CODE_VERIFICATION_ENGINE,
                format!("verification failed: {err}"),
            ),
        }
    }
}

impl From<NotebookError> for ApiError {
    fn from(err: NotebookError) -> Self {
        ApiError::internal(err.to_string())
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotReady => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                CODE_ENGINE_NOT_READY,
                err.to_string(),
            ),
            other => ApiError::internal(other.to_string()),
        }
    }
}

/// Caller identity taken from the `x-user-id` header.
pub struct Actor(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Actor(value.to_string()))
            .ok_or_else(|| {
                ApiError::new(
                    StatusCode::UNAUTHORIZED,
                    CODE_UNAUTHENTICATED,
                    format!("missing {USER_HEADER} header"),
                )
            })
    }
}

pub async fn serve(config: ServiceConfig) -> anyhow::Result<()> {
    zkdm_common::ensure_ready().context("proof engine self-test failed")?;

    let listen_addr = config.listen_addr.clone();
    let enable_cors = config.enable_cors;
    let state = AppState::from_config(config)?;

    let mut app = app_router(state);
    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    info!(addr = %listen_addr, "zkdm backend listening");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

pub fn app_router(state: AppState) -> Router {
    const REQUEST: &str = "/zkdm/datasets/:dataset_id/requests/:request_id";
    Router::new()
        .route("/zkdm/scales", get(get_scales))
        .route("/zkdm/datasets", post(create_dataset).get(list_datasets))
        .route("/zkdm/datasets/:dataset_id", get(get_dataset))
        .route(
            "/zkdm/datasets/:dataset_id/commitment",
            put(put_commitment).get(get_commitment),
        )
        .route(
            "/zkdm/datasets/:dataset_id/requests",
            post(create_request).get(list_requests),
        )
        .route(REQUEST, get(get_request))
        .route(&format!("{REQUEST}/accept"), post(accept_request))
        .route(&format!("{REQUEST}/assets/:kind"), put(upload_asset))
        .route(&format!("{REQUEST}/result"), post(submit_result))
        .route(&format!("{REQUEST}/verify"), post(verify_request))
        .route(&format!("{REQUEST}/approve"), post(approve_request))
        .route(&format!("{REQUEST}/notebook"), get(get_prover_notebook))
        .route(
            &format!("{REQUEST}/notebook/verifier"),
            get(get_verifier_notebook),
        )
        .route("/zkdm/srs/:srs_id", put(put_srs).get(get_srs))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

#[derive(Serialize)]
struct ScalesResponse {
    scales: Vec<u32>,
    poseidon: PoseidonParams,
}

#[derive(Serialize)]
struct PoseidonParams {
    width: usize,
    rate: usize,
    full_rounds: usize,
    partial_rounds: usize,
}

/// Scale set and hash parameters a client needs to build a commitment that
/// matches the one proofs are checked against.
async fn get_scales() -> Result<Json<ScalesResponse>, ApiError> {
    zkdm_common::engine()?;
    Ok(Json(ScalesResponse {
        scales: supported_scales(),
        poseidon: PoseidonParams {
            width: POSEIDON_T,
            rate: POSEIDON_RATE,
            full_rounds: POSEIDON_FULL_ROUNDS,
            partial_rounds: POSEIDON_PARTIAL_ROUNDS,
        },
    }))
}

#[derive(Deserialize)]
struct CreateDatasetBody {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    schema: Option<JsonValue>,
    #[serde(default)]
    rows: Option<usize>,
    #[serde(default)]
    columns: Option<usize>,
}

async fn create_dataset(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Json(body): Json<CreateDatasetBody>,
) -> Result<(StatusCode, Json<DatasetRecord>), ApiError> {
    if body.title.trim().is_empty() {
        return Err(ApiError::parse("dataset title must not be empty"));
    }
    let now = Utc::now();
    let record = DatasetRecord {
        id: Uuid::new_v4(),
        title: body.title,
        description: body.description,
        owner_id: actor,
        schema: body.schema,
        rows: body.rows,
        columns: body.columns,
        created_at: now,
        updated_at: now,
    };
    state.lifecycle.records().insert_dataset(record.clone())?;
    info!(dataset_id = %record.id, owner = %record.owner_id, "dataset created");
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_datasets(State(state): State<AppState>) -> Result<Json<Vec<DatasetRecord>>, ApiError> {
    Ok(Json(state.lifecycle.records().datasets()?))
}

#[derive(Serialize)]
struct DatasetResponse {
    #[serde(flatten)]
    dataset: DatasetRecord,
    commitment_present: bool,
}

async fn get_dataset(
    State(state): State<AppState>,
    AxumPath(dataset_id): AxumPath<Uuid>,
) -> Result<Json<DatasetResponse>, ApiError> {
    let dataset = state.lifecycle.dataset(&dataset_id)?;
    let commitment_present = load_commitment(&state.assets, &dataset_id).await?.is_some();
    Ok(Json(DatasetResponse {
        dataset,
        commitment_present,
    }))
}

/// Every digest must be a canonical field element encoding.
fn validate_commitment(commitment: &DataCommitment) -> Result<(), ApiError> {
    if !commitment.is_complete_for_supported_scales() {
        return Err(ApiError::parse(
            "commitment must cover every supported scale with the same columns",
        ));
    }
    for scale in commitment.scales() {
        for column in commitment.columns(scale) {
            let digest = commitment.digest(scale, column).unwrap_or_default();
            fr_from_hex(digest).map_err(|err| {
                ApiError::parse(format!("column '{column}' at scale {scale}: {err:#}"))
            })?;
        }
    }
    Ok(())
}

/// Replaces the dataset's commitment. Previously submitted proofs are not
/// re-checked.
async fn put_commitment(
    State(state): State<AppState>,
    Actor(actor): Actor,
    AxumPath(dataset_id): AxumPath<Uuid>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let dataset = state.lifecycle.dataset(&dataset_id)?;
    if dataset.owner_id != actor {
        return Err(ApiError::forbidden("only the dataset owner may commit to it"));
    }
    let commitment = DataCommitment::from_json_bytes(&body)
        .map_err(|err| ApiError::parse(format!("{err:#}")))?;
    validate_commitment(&commitment)?;

    let bytes = commitment
        .to_json_bytes()
        .map_err(|err| ApiError::internal(format!("{err:#}")))?;
    state
        .assets
        .put(PROOF_ASSETS_BUCKET, &commitment_path(&dataset_id), bytes)
        .await?;
    info!(%dataset_id, "data commitment stored");
    Ok(StatusCode::NO_CONTENT)
}

async fn get_commitment(
    State(state): State<AppState>,
    AxumPath(dataset_id): AxumPath<Uuid>,
) -> Result<Json<DataCommitment>, ApiError> {
    state.lifecycle.dataset(&dataset_id)?;
    load_commitment(&state.assets, &dataset_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("commitment for dataset {dataset_id} not found")))
}

#[derive(Deserialize)]
struct CreateRequestBody {
    title: String,
    #[serde(default)]
    description: String,
    code: String,
    /// Built-in computation the code is proven with.
    kind: ComputationKind,
    operands: Vec<String>,
    #[serde(default)]
    username: Option<String>,
}

async fn create_request(
    State(state): State<AppState>,
    Actor(actor): Actor,
    AxumPath(dataset_id): AxumPath<Uuid>,
    Json(body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<RequestRecord>), ApiError> {
    if body.code.trim().is_empty() {
        return Err(ApiError::parse("computation code must not be empty"));
    }
    let computation = AgreedComputation::new(body.kind, body.operands);
    computation.validate().map_err(ApiError::parse)?;
    let notebook = state.notebooks.generate(&body.code, &computation)?;
    let record = state.lifecycle.create_request(
        &actor,
        &dataset_id,
        NewRequest {
            title: body.title,
            description: body.description,
            code: body.code,
            computation,
            username: body.username,
        },
    )?;

    if let Err(err) = state
        .assets
        .put(COMPUTATIONS_BUCKET, &notebook_path(&record.id), notebook)
        .await
    {
        warn!(request_id = %record.id, error = %err, "failed to store prover notebook; it will be regenerated on download");
    }
    Ok((StatusCode::CREATED, Json(record)))
}

#[derive(Deserialize)]
struct ListRequestsQuery {
    user_id: Option<String>,
}

async fn list_requests(
    State(state): State<AppState>,
    AxumPath(dataset_id): AxumPath<Uuid>,
    Query(query): Query<ListRequestsQuery>,
) -> Result<Json<Vec<RequestRecord>>, ApiError> {
    state.lifecycle.dataset(&dataset_id)?;
    let requests = state
        .lifecycle
        .records()
        .requests_for_dataset(&dataset_id, query.user_id.as_deref())?;
    Ok(Json(requests))
}

#[derive(Serialize)]
struct RequestReport {
    request: RequestRecord,
    status: RequestStatus,
    bundle: BundlePresence,
    bundle_complete: bool,
    commitment_present: bool,
}

async fn request_report(state: &AppState, request: RequestRecord) -> Result<RequestReport, ApiError> {
    let bundle = state
        .lifecycle
        .bundle_presence(&request.dataset_id, &request.id)
        .await;
    let commitment_present = load_commitment(&state.assets, &request.dataset_id)
        .await?
        .is_some();
    Ok(RequestReport {
        status: request.status(),
        bundle_complete: bundle.is_complete(),
        bundle,
        commitment_present,
        request,
    })
}

async fn get_request(
    State(state): State<AppState>,
    AxumPath((dataset_id, request_id)): AxumPath<(Uuid, Uuid)>,
) -> Result<Json<RequestReport>, ApiError> {
    let (_, request) = state.lifecycle.load(&dataset_id, &request_id)?;
    Ok(Json(request_report(&state, request).await?))
}

async fn accept_request(
    State(state): State<AppState>,
    Actor(actor): Actor,
    AxumPath((dataset_id, request_id)): AxumPath<(Uuid, Uuid)>,
) -> Result<Json<RequestReport>, ApiError> {
    let request = state
        .lifecycle
        .accept(&actor, &dataset_id, &request_id)
        .await?;
    Ok(Json(request_report(&state, request).await?))
}

async fn upload_asset(
    State(state): State<AppState>,
    Actor(actor): Actor,
    AxumPath((dataset_id, request_id, kind)): AxumPath<(Uuid, Uuid, String)>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let kind: AssetKind = kind.parse().map_err(ApiError::not_found)?;
    state
        .lifecycle
        .upload_bundle_asset(&actor, &dataset_id, &request_id, kind, body.to_vec())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct SubmitResultBody {
    result: Option<ComputationResult>,
    srs_id: String,
    /// Bundle files, base64 encoded.
    #[serde(default)]
    proof: Option<String>,
    #[serde(default)]
    precal_witness: Option<String>,
    #[serde(default)]
    settings: Option<String>,
}

impl SubmitResultBody {
    fn into_submission(self) -> Result<ResultSubmission, ApiError> {
        let mut files = Vec::new();
        for (kind, encoded) in [
            (AssetKind::Proof, self.proof),
            (AssetKind::PrecalWitness, self.precal_witness),
            (AssetKind::Settings, self.settings),
        ] {
            if let Some(encoded) = encoded {
                let bytes = BASE64
                    .decode(encoded.trim())
                    .map_err(|err| ApiError::parse(format!("{kind} is not valid base64: {err}")))?;
                files.push((kind, bytes));
            }
        }
        Ok(ResultSubmission {
            result: self.result,
            srs_id: self.srs_id,
            files,
        })
    }
}

async fn submit_result(
    State(state): State<AppState>,
    Actor(actor): Actor,
    AxumPath((dataset_id, request_id)): AxumPath<(Uuid, Uuid)>,
    Json(body): Json<SubmitResultBody>,
) -> Result<Json<RequestReport>, ApiError> {
    let submission = body.into_submission()?;
    let request = state
        .lifecycle
        .submit_result(&actor, &dataset_id, &request_id, submission)
        .await?;
    Ok(Json(request_report(&state, request).await?))
}

async fn verify_request(
    State(state): State<AppState>,
    Actor(actor): Actor,
    AxumPath((dataset_id, request_id)): AxumPath<(Uuid, Uuid)>,
) -> Result<Json<VerificationReport>, ApiError> {
    let (dataset, request) = state.lifecycle.load(&dataset_id, &request_id)?;
    if actor != dataset.owner_id && actor != request.user_id {
        return Err(ApiError::forbidden(
            "only the dataset owner or the requester may verify",
        ));
    }
    let report = state.verification.verify_request(&dataset, &request).await?;
    Ok(Json(report))
}

async fn approve_request(
    State(state): State<AppState>,
    Actor(actor): Actor,
    AxumPath((dataset_id, request_id)): AxumPath<(Uuid, Uuid)>,
) -> Result<Json<RequestReport>, ApiError> {
    if state.config.require_verified_approval {
        let (dataset, request) = state
            .lifecycle
            .check_approve(&actor, &dataset_id, &request_id)?;
        let report = state.verification.verify_request(&dataset, &request).await?;
        if !report.verified {
            let reason = report
                .reason
                .unwrap_or_else(|| "verification did not pass".to_string());
            return Err(StateGuardViolation::NotVerified(reason).into());
        }
    }
    let request = state
        .lifecycle
        .approve(&actor, &dataset_id, &request_id)
        .await?;
    Ok(Json(request_report(&state, request).await?))
}

fn notebook_response(bytes: Vec<u8>) -> Response {
    let mut response = Response::new(Body::from(bytes));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(NOTEBOOK_CONTENT_TYPE),
    );
    response
}

/// Returns the stored notebook, regenerating and storing it when missing.
async fn stored_or_generated(
    state: &AppState,
    path: &str,
    generate: impl FnOnce() -> Result<Vec<u8>, NotebookError>,
) -> Result<Vec<u8>, ApiError> {
    match state.assets.get(COMPUTATIONS_BUCKET, path).await {
        Ok(bytes) => return Ok(bytes),
        Err(StorageError::NotFound(_)) => {}
        Err(err) => warn!(path, error = %err, "notebook lookup failed; regenerating"),
    }
    let bytes = generate()?;
    if let Err(err) = state
        .assets
        .put(COMPUTATIONS_BUCKET, path, bytes.clone())
        .await
    {
        warn!(path, error = %err, "failed to store regenerated notebook");
    }
    Ok(bytes)
}

async fn get_prover_notebook(
    State(state): State<AppState>,
    AxumPath((dataset_id, request_id)): AxumPath<(Uuid, Uuid)>,
) -> Result<Response, ApiError> {
    let (_, request) = state.lifecycle.load(&dataset_id, &request_id)?;
    let bytes = stored_or_generated(&state, &notebook_path(&request.id), || {
        state.notebooks.generate(&request.code, &request.computation)
    })
    .await?;
    Ok(notebook_response(bytes))
}

async fn get_verifier_notebook(
    State(state): State<AppState>,
    AxumPath((dataset_id, request_id)): AxumPath<(Uuid, Uuid)>,
) -> Result<Response, ApiError> {
    let (_, request) = state.lifecycle.load(&dataset_id, &request_id)?;
    let bytes = stored_or_generated(&state, &verifier_notebook_path(&request.id), || {
        state.notebooks.generate_verifier(&request.code, &request.computation)
    })
    .await?;
    Ok(notebook_response(bytes))
}

/// Registers a reference string. An id can be registered once; re-uploading
/// identical bytes is accepted.
async fn put_srs(
    State(state): State<AppState>,
    Actor(actor): Actor,
    AxumPath(srs_id): AxumPath<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    if !is_valid_srs_id(&srs_id) {
        return Err(ApiError::parse(format!("invalid srs_id '{srs_id}'")));
    }
    deserialize_params(&body).map_err(|err| ApiError::parse(format!("{err:#}")))?;

    let path = srs_path(&srs_id);
    match state.assets.get(PROOF_ASSETS_BUCKET, &path).await {
        Ok(existing) if existing == body.as_ref() => return Ok(StatusCode::NO_CONTENT),
        Ok(_) => {
            return Err(ApiError::new(
                StatusCode::CONFLICT,
                CODE_STATE_GUARD,
                format!("reference string '{srs_id}' is already registered"),
            ))
        }
        Err(StorageError::NotFound(_)) => {}
        Err(err) => return Err(err.into()),
    }
    state
        .assets
        .put(PROOF_ASSETS_BUCKET, &path, body.to_vec())
        .await?;
    info!(%srs_id, uploader = %actor, size = body.len(), "reference string registered");
    Ok(StatusCode::CREATED)
}

async fn get_srs(
    State(state): State<AppState>,
    AxumPath(srs_id): AxumPath<String>,
) -> Result<Response, ApiError> {
    if !is_valid_srs_id(&srs_id) {
        return Err(ApiError::parse(format!("invalid srs_id '{srs_id}'")));
    }
    let bytes = state
        .assets
        .get(PROOF_ASSETS_BUCKET, &srs_path(&srs_id))
        .await?;
    let mut response = Response::new(Body::from(bytes));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    Ok(response)
}
