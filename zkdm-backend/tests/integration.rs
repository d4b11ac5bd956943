use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::{json, Value};
use tower::util::ServiceExt;
use zkdm_backend::{
    app_router,
    assets::AssetStore,
    config::ServiceConfig,
    notebook::TemplateNotebookGenerator,
    records::RecordStore,
    verification::AssetSrsSource,
    AppState,
};
use zkdm_common::{supported_scales, DataCommitment};
use zkdm_prover::ProofBundleFiles;
use zkdm_test_fixtures::{bundle_bytes, fixtures, SQUARES_CODE, SRS_ID, SUM_CODE};
use zkdm_verifier::LocalKeyResolver;

const BODY_LIMIT: usize = usize::MAX;
const OWNER: &str = "owner-1";
const CONSUMER: &str = "consumer-1";

fn test_app_with(config: ServiceConfig) -> Router {
    let assets = AssetStore::in_memory();
    let resolver = Arc::new(LocalKeyResolver::new(AssetSrsSource::new(assets.clone())));
    let notebooks = Arc::new(TemplateNotebookGenerator::bundled().expect("bundled templates"));
    let state = AppState::with_components(
        config,
        RecordStore::in_memory(),
        assets,
        resolver,
        notebooks,
    );
    app_router(state)
}

fn test_app() -> Router {
    test_app_with(ServiceConfig::in_memory())
}

struct Reply {
    status: StatusCode,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

impl Reply {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.bytes).expect("json body")
    }

    fn error_code(&self) -> String {
        self.json()["error_code"].as_str().unwrap_or_default().to_string()
    }
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    user: Option<&str>,
    body: Body,
) -> Reply {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    let response = app
        .clone()
        .oneshot(
            builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(body)
                .unwrap(),
        )
        .await
        .expect("response");
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let bytes = body::to_bytes(response.into_body(), BODY_LIMIT)
        .await
        .unwrap()
        .to_vec();
    Reply {
        status,
        content_type,
        bytes,
    }
}

async fn send_json(app: &Router, method: Method, uri: &str, user: Option<&str>, value: Value) -> Reply {
    send(app, method, uri, user, Body::from(value.to_string())).await
}

async fn create_dataset(app: &Router) -> String {
    let reply = send_json(
        app,
        Method::POST,
        "/zkdm/datasets",
        Some(OWNER),
        json!({"title": "sensor readings", "rows": 3, "columns": 2}),
    )
    .await;
    assert_eq!(reply.status, StatusCode::CREATED);
    reply.json()["id"].as_str().unwrap().to_string()
}

async fn put_commitment(app: &Router, dataset: &str, commitment: &DataCommitment) -> Reply {
    send(
        app,
        Method::PUT,
        &format!("/zkdm/datasets/{dataset}/commitment"),
        Some(OWNER),
        Body::from(commitment.to_json_bytes().unwrap()),
    )
    .await
}

async fn put_fixture_srs(app: &Router) {
    let reply = send(
        app,
        Method::PUT,
        &format!("/zkdm/srs/{SRS_ID}"),
        Some(OWNER),
        Body::from(fixtures().srs_bytes().to_vec()),
    )
    .await;
    assert_eq!(reply.status, StatusCode::CREATED);
}

async fn post_request(
    app: &Router,
    dataset: &str,
    code: &str,
    kind: &str,
    operands: &[&str],
) -> Reply {
    send_json(
        app,
        Method::POST,
        &format!("/zkdm/datasets/{dataset}/requests"),
        Some(CONSUMER),
        json!({
            "title": "total",
            "description": "aggregate over x",
            "code": code,
            "kind": kind,
            "operands": operands,
        }),
    )
    .await
}

async fn create_request(app: &Router, dataset: &str, code: &str, kind: &str) -> String {
    let reply = post_request(app, dataset, code, kind, &["x"]).await;
    assert_eq!(reply.status, StatusCode::CREATED);
    reply.json()["id"].as_str().unwrap().to_string()
}

fn request_uri(dataset: &str, request: &str, suffix: &str) -> String {
    format!("/zkdm/datasets/{dataset}/requests/{request}{suffix}")
}

fn full_submission(result: f64) -> Value {
    submission_of(fixtures().sum_bundle(), result)
}

fn submission_of(bundle: &ProofBundleFiles, result: f64) -> Value {
    let (proof, settings, witness) = bundle_bytes(bundle);
    json!({
        "result": result,
        "srs_id": SRS_ID,
        "proof": BASE64.encode(proof),
        "settings": BASE64.encode(settings),
        "precal_witness": BASE64.encode(witness),
    })
}

/// Dataset committed to `commitment`, reference string registered and an
/// accepted request for the sum computation.
async fn accepted_request(app: &Router, commitment: &DataCommitment) -> (String, String) {
    accepted_request_for(app, commitment, SUM_CODE, "sum").await
}

async fn accepted_request_for(
    app: &Router,
    commitment: &DataCommitment,
    code: &str,
    kind: &str,
) -> (String, String) {
    let dataset = create_dataset(app).await;
    assert_eq!(
        put_commitment(app, &dataset, commitment).await.status,
        StatusCode::NO_CONTENT
    );
    put_fixture_srs(app).await;
    let request = create_request(app, &dataset, code, kind).await;
    let reply = send(
        app,
        Method::POST,
        &request_uri(&dataset, &request, "/accept"),
        Some(OWNER),
        Body::empty(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    (dataset, request)
}

#[tokio::test]
async fn scales_endpoint_reports_supported_scales() {
    let app = test_app();
    let reply = send(&app, Method::GET, "/zkdm/scales", None, Body::empty()).await;
    assert_eq!(reply.status, StatusCode::OK);

    let value = reply.json();
    let scales: Vec<u32> = serde_json::from_value(value["scales"].clone()).unwrap();
    assert_eq!(scales, supported_scales());
    assert!(value["poseidon"]["width"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn mutating_calls_require_a_user() {
    let app = test_app();
    let reply = send_json(
        &app,
        Method::POST,
        "/zkdm/datasets",
        None,
        json!({"title": "anonymous"}),
    )
    .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.error_code(), "UNAUTHENTICATED");
}

#[tokio::test]
async fn commitment_upload_requires_every_scale_and_the_owner() {
    let app = test_app();
    let dataset = create_dataset(&app).await;
    let full = fixtures().commitment();

    let mut partial = DataCommitment::new();
    for column in full.columns(1) {
        partial.insert(1, column, full.digest(1, column).unwrap());
    }
    let reply = put_commitment(&app, &dataset, &partial).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error_code(), "PARSE_ERROR");

    let reply = send(
        &app,
        Method::PUT,
        &format!("/zkdm/datasets/{dataset}/commitment"),
        Some(CONSUMER),
        Body::from(full.to_json_bytes().unwrap()),
    )
    .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    let reply = send(
        &app,
        Method::GET,
        &format!("/zkdm/datasets/{dataset}"),
        None,
        Body::empty(),
    )
    .await;
    assert_eq!(reply.json()["commitment_present"], false);

    assert_eq!(put_commitment(&app, &dataset, full).await.status, StatusCode::NO_CONTENT);
    let reply = send(
        &app,
        Method::GET,
        &format!("/zkdm/datasets/{dataset}/commitment"),
        None,
        Body::empty(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    let stored = DataCommitment::from_json_bytes(&reply.bytes).unwrap();
    assert_eq!(&stored, full);
}

#[tokio::test]
async fn request_runs_from_creation_to_approval() {
    let app = test_app();
    let dataset = create_dataset(&app).await;
    assert_eq!(
        put_commitment(&app, &dataset, fixtures().commitment()).await.status,
        StatusCode::NO_CONTENT
    );
    put_fixture_srs(&app).await;
    let request = create_request(&app, &dataset, SUM_CODE, "sum").await;

    let reply = send(
        &app,
        Method::GET,
        &request_uri(&dataset, &request, "/notebook"),
        None,
        Body::empty(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.content_type.as_deref(), Some("application/x-ipynb+json"));
    let notebook = String::from_utf8_lossy(&reply.bytes);
    assert!(notebook.contains("return x.sum()"));
    assert!(notebook.contains(r#"OPERANDS = [\"x\"]"#));

    let reply = send(
        &app,
        Method::POST,
        &request_uri(&dataset, &request, "/accept"),
        Some(CONSUMER),
        Body::empty(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.error_code(), "STATE_GUARD_VIOLATION");

    let first = send(
        &app,
        Method::POST,
        &request_uri(&dataset, &request, "/accept"),
        Some(OWNER),
        Body::empty(),
    )
    .await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.json()["status"], "accepted");
    let second = send(
        &app,
        Method::POST,
        &request_uri(&dataset, &request, "/accept"),
        Some(OWNER),
        Body::empty(),
    )
    .await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(
        first.json()["request"]["version"],
        second.json()["request"]["version"]
    );

    let reply = send(
        &app,
        Method::POST,
        &request_uri(&dataset, &request, "/verify"),
        Some(CONSUMER),
        Body::empty(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert_eq!(reply.error_code(), "STATE_GUARD_VIOLATION");

    let reply = send(
        &app,
        Method::POST,
        &request_uri(&dataset, &request, "/approve"),
        Some(CONSUMER),
        Body::empty(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::CONFLICT);

    let mut partial = full_submission(6.0);
    partial.as_object_mut().unwrap().remove("precal_witness");
    let reply = send_json(
        &app,
        Method::POST,
        &request_uri(&dataset, &request, "/result"),
        Some(OWNER),
        partial,
    )
    .await;
    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert_eq!(reply.error_code(), "STATE_GUARD_VIOLATION");
    assert!(reply.json()["error"]
        .as_str()
        .unwrap()
        .contains("precal_witness.json"));

    let reply = send(
        &app,
        Method::GET,
        &request_uri(&dataset, &request, ""),
        None,
        Body::empty(),
    )
    .await;
    let value = reply.json();
    assert_eq!(value["status"], "accepted");
    assert_eq!(value["bundle"]["proof"], true);
    assert_eq!(value["bundle"]["precal_witness"], false);
    assert_eq!(value["bundle_complete"], false);

    let reply = send_json(
        &app,
        Method::POST,
        &request_uri(&dataset, &request, "/result"),
        Some(OWNER),
        full_submission(6.0),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    let value = reply.json();
    assert_eq!(value["status"], "completed");
    assert_eq!(value["request"]["srs_id"], SRS_ID);
    assert_eq!(value["bundle_complete"], true);

    let reply = send(
        &app,
        Method::POST,
        &request_uri(&dataset, &request, "/verify"),
        Some("stranger"),
        Body::empty(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    let reply = send(
        &app,
        Method::POST,
        &request_uri(&dataset, &request, "/verify"),
        Some(CONSUMER),
        Body::empty(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    let report = reply.json();
    assert_eq!(report["verified"], true);
    assert_eq!(report["proof_valid"], true);
    assert_eq!(report["commitment_matched"], true);
    assert_eq!(report["computation_matched"], true);
    assert_eq!(report["kind"], "sum");
    assert_eq!(report["operands"], json!(["x"]));
    assert!(report.get("reason").is_none());
    assert_eq!(report["proven_output"], 6.0);
    assert_eq!(report["srs_id"], SRS_ID);

    let reply = send(
        &app,
        Method::POST,
        &request_uri(&dataset, &request, "/approve"),
        Some(OWNER),
        Body::empty(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    let reply = send(
        &app,
        Method::POST,
        &request_uri(&dataset, &request, "/approve"),
        Some(CONSUMER),
        Body::empty(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()["status"], "approved");

    let reply = send(
        &app,
        Method::POST,
        &request_uri(&dataset, &request, "/approve"),
        Some(CONSUMER),
        Body::empty(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::CONFLICT);

    let reply = send(
        &app,
        Method::GET,
        &format!("/zkdm/datasets/{dataset}/requests?user_id={CONSUMER}"),
        None,
        Body::empty(),
    )
    .await;
    assert_eq!(reply.json().as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn proof_over_other_data_does_not_verify() {
    let app = test_app();
    let (dataset, request) = accepted_request(&app, fixtures().mutated_commitment()).await;

    let reply = send_json(
        &app,
        Method::POST,
        &request_uri(&dataset, &request, "/result"),
        Some(OWNER),
        full_submission(6.0),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);

    let reply = send(
        &app,
        Method::POST,
        &request_uri(&dataset, &request, "/verify"),
        Some(CONSUMER),
        Body::empty(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    let report = reply.json();
    assert_eq!(report["proof_valid"], true);
    assert_eq!(report["commitment_matched"], false);
    assert_eq!(report["verified"], false);
    assert!(report["reason"].as_str().is_some());
}

#[tokio::test]
async fn requests_name_a_well_formed_computation() {
    let app = test_app();
    let dataset = create_dataset(&app).await;

    let reply = post_request(&app, &dataset, SUM_CODE, "dot_product", &["x"]).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error_code(), "PARSE_ERROR");

    let reply = post_request(&app, &dataset, SUM_CODE, "median", &["x"]).await;
    assert!(reply.status.is_client_error());

    let reply = post_request(&app, &dataset, SUM_CODE, "sum", &["x"]).await;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(
        reply.json()["computation"],
        json!({"kind": "sum", "operands": ["x"]})
    );
}

#[tokio::test]
async fn agreed_computation_proves_and_verifies() {
    let app = test_app();
    let (dataset, request) =
        accepted_request_for(&app, fixtures().commitment(), SQUARES_CODE, "sum_of_squares").await;
    let reply = send_json(
        &app,
        Method::POST,
        &request_uri(&dataset, &request, "/result"),
        Some(OWNER),
        submission_of(fixtures().squares_bundle(), 14.0),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);

    let reply = send(
        &app,
        Method::POST,
        &request_uri(&dataset, &request, "/verify"),
        Some(CONSUMER),
        Body::empty(),
    )
    .await;
    let report = reply.json();
    assert_eq!(report["verified"], true);
    assert_eq!(report["kind"], "sum_of_squares");
    assert_eq!(report["proven_output"], 14.0);
}

#[tokio::test]
async fn bundle_proving_another_function_does_not_verify() {
    // The settings carry the digest of the agreed code, but the circuit sums column y.
    let app = test_app_with(ServiceConfig {
        require_verified_approval: true,
        ..ServiceConfig::in_memory()
    });
    let (dataset, request) =
        accepted_request_for(&app, fixtures().commitment(), SQUARES_CODE, "sum_of_squares").await;
    let reply = send_json(
        &app,
        Method::POST,
        &request_uri(&dataset, &request, "/result"),
        Some(OWNER),
        submission_of(fixtures().relabelled_bundle(), 15.0),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);

    let reply = send(
        &app,
        Method::POST,
        &request_uri(&dataset, &request, "/verify"),
        Some(CONSUMER),
        Body::empty(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    let report = reply.json();
    assert_eq!(report["verified"], false);
    assert_eq!(report["computation_matched"], false);
    assert_eq!(report["kind"], "sum");
    assert_eq!(report["operands"], json!(["y"]));
    let reason = report["reason"].as_str().unwrap();
    assert!(reason.contains("sum(y)"));
    assert!(reason.contains("sum_of_squares(x)"));

    let reply = send(
        &app,
        Method::POST,
        &request_uri(&dataset, &request, "/approve"),
        Some(CONSUMER),
        Body::empty(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert!(reply.json()["error"].as_str().unwrap().contains("sum(y)"));
}

#[tokio::test]
async fn every_failed_check_is_reported() {
    let app = test_app();
    let (dataset, request) = accepted_request(&app, fixtures().mutated_commitment()).await;

    let mut submission = full_submission(6.0);
    let proof = BASE64
        .decode(submission["proof"].as_str().unwrap())
        .unwrap();
    let mut proof: Value = serde_json::from_slice(&proof).unwrap();
    let instances = proof["instances"][0].as_array_mut().unwrap();
    let digest = instances[0].clone();
    *instances.last_mut().unwrap() = digest;
    submission["proof"] = BASE64.encode(proof.to_string()).into();

    let reply = send_json(
        &app,
        Method::POST,
        &request_uri(&dataset, &request, "/result"),
        Some(OWNER),
        submission,
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);

    let reply = send(
        &app,
        Method::POST,
        &request_uri(&dataset, &request, "/verify"),
        Some(OWNER),
        Body::empty(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    let report = reply.json();
    assert_eq!(report["proof_valid"], false);
    assert_eq!(report["commitment_matched"], false);
    let reason = report["reason"].as_str().unwrap();
    assert!(reason.contains("proof rejected by the verifier"));
    assert!(reason.contains("does not match the commitment"));
}

#[tokio::test]
async fn verified_approval_blocks_unbound_proofs() {
    let app = test_app_with(ServiceConfig {
        require_verified_approval: true,
        ..ServiceConfig::in_memory()
    });
    let (dataset, request) = accepted_request(&app, fixtures().mutated_commitment()).await;
    let reply = send_json(
        &app,
        Method::POST,
        &request_uri(&dataset, &request, "/result"),
        Some(OWNER),
        full_submission(6.0),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);

    let reply = send(
        &app,
        Method::POST,
        &request_uri(&dataset, &request, "/approve"),
        Some(CONSUMER),
        Body::empty(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert_eq!(reply.error_code(), "STATE_GUARD_VIOLATION");

    let reply = send(
        &app,
        Method::GET,
        &request_uri(&dataset, &request, ""),
        None,
        Body::empty(),
    )
    .await;
    assert_eq!(reply.json()["status"], "completed");
}

#[tokio::test]
async fn reference_strings_register_once() {
    let app = test_app();
    let reply = send(
        &app,
        Method::PUT,
        "/zkdm/srs/broken",
        Some(OWNER),
        Body::from(vec![1u8, 2, 3]),
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error_code(), "PARSE_ERROR");

    put_fixture_srs(&app).await;
    let reply = send(
        &app,
        Method::PUT,
        &format!("/zkdm/srs/{SRS_ID}"),
        Some(OWNER),
        Body::from(fixtures().srs_bytes().to_vec()),
    )
    .await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    let other = zkdm_common::serialize_params(&zkdm_prover::generate_srs_seeded(4, 1)).unwrap();
    let reply = send(
        &app,
        Method::PUT,
        &format!("/zkdm/srs/{SRS_ID}"),
        Some(OWNER),
        Body::from(other),
    )
    .await;
    assert_eq!(reply.status, StatusCode::CONFLICT);

    let reply = send(
        &app,
        Method::GET,
        &format!("/zkdm/srs/{SRS_ID}"),
        None,
        Body::empty(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.bytes, fixtures().srs_bytes());
}

#[tokio::test]
async fn unknown_records_are_not_found() {
    let app = test_app();
    let dataset = create_dataset(&app).await;
    let reply = send(
        &app,
        Method::GET,
        &request_uri(&dataset, "00000000-0000-0000-0000-000000000000", ""),
        None,
        Body::empty(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.error_code(), "NOT_FOUND");

    let reply = send(
        &app,
        Method::GET,
        &format!("/zkdm/datasets/{dataset}/commitment"),
        None,
        Body::empty(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}
