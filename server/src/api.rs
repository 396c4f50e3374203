//! # HTTP Surface
//!
//! The axum router exposing the whitelist and Merkle-tree operations. Every
//! response is HTTP 200 carrying a `{success, data?, errorCode?,
//! errorMessage?}` envelope — except authorization failures, which are 403
//! with the same envelope shape.
//!
//! ## Routes
//!
//! | Method | Path                | Auth        |
//! |--------|---------------------|-------------|
//! | POST   | `/UploadWhitelist`  | group-gated |
//! | DELETE | `/Whitelist`        | group-gated |
//! | POST   | `/CreateMerkleTree` | group-gated |
//! | DELETE | `/MerkleTree`       | group-gated |
//! | GET    | `/MerkleTrees`      | open        |
//! | GET    | `/MerkleRoot`       | group-gated |
//! | GET    | `/MerkleRoots`      | group-gated |
//! | GET    | `/MerkleProof`      | open        |
//! | GET    | `/MerkleProofs`     | group-gated |
//! | GET    | `/health`           | open        |
//!
//! ## Authorization
//!
//! Token validation lives in the fronting gateway; by the time a request
//! reaches this process, the gateway has verified the caller's JWT and
//! injected their group memberships into the `x-caller-groups` header. A
//! gated route requires that header to be present; a route configured with
//! a non-empty group list additionally requires a non-empty intersection.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use claimtree_core::config::{
    parse_group_list, ServiceConfig, MAX_UPLOAD_BASE64_LEN, MIN_UPLOAD_BASE64_LEN,
};
use claimtree_core::error::ServiceError;
use claimtree_core::lifecycle::TreeLifecycle;
use claimtree_core::query::TreeReader;

use crate::metrics::SharedMetrics;

/// Header carrying the gateway-verified group memberships of the caller.
pub const CALLER_GROUPS_HEADER: &str = "x-caller-groups";

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared state for all request handlers. Cheap to clone — everything is
/// behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<TreeLifecycle>,
    pub reader: Arc<TreeReader>,
    pub config: Arc<ServiceConfig>,
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The uniform response envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// 200 with a success envelope.
fn ok(data: serde_json::Value) -> Response {
    Json(Envelope {
        success: true,
        data: Some(data),
        error_code: None,
        error_message: None,
    })
    .into_response()
}

/// A failure envelope: 403 for authorization failures, 200 otherwise.
fn fail(err: &ServiceError) -> Response {
    let status = match err {
        ServiceError::UnauthorizedAccess => StatusCode::FORBIDDEN,
        _ => StatusCode::OK,
    };
    (
        status,
        Json(Envelope {
            success: false,
            data: None,
            error_code: Some(err.error_code().to_string()),
            error_message: Some(err.to_string()),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Authorization
// ---------------------------------------------------------------------------

/// Group memberships the gateway attached to this request, or `None` for an
/// anonymous caller.
fn caller_groups(headers: &HeaderMap) -> Option<Vec<String>> {
    headers
        .get(CALLER_GROUPS_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(parse_group_list)
}

/// Gate check for a group-gated route: the caller must be authenticated,
/// and — when the route's list is non-empty — in at least one listed group.
pub fn authorize(required: &[String], caller: Option<&[String]>) -> Result<(), ServiceError> {
    let caller = caller.ok_or(ServiceError::UnauthorizedAccess)?;
    if required.is_empty() {
        return Ok(());
    }
    if caller.iter().any(|g| required.iter().any(|r| r == g)) {
        Ok(())
    } else {
        Err(ServiceError::UnauthorizedAccess)
    }
}

// ---------------------------------------------------------------------------
// Request Types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadWhitelistRequest {
    pub whitelist_name: String,
    pub whitelist_base64_content: String,
    /// Off by default; an existing CSV fails the upload unless set.
    #[serde(default)]
    pub allow_overwrite: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistNameRequest {
    pub whitelist_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameQuery {
    pub whitelist_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofQuery {
    pub whitelist_name: Option<String>,
    pub whitelist_address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub page_size: Option<String>,
    pub starting_token: Option<String>,
}

/// Decodes and bounds-checks the upload payload.
fn decode_csv_payload(base64_content: &str) -> Result<Vec<u8>, ServiceError> {
    let len = base64_content.len();
    if !(MIN_UPLOAD_BASE64_LEN..=MAX_UPLOAD_BASE64_LEN).contains(&len) {
        return Err(ServiceError::validation(format!(
            "whitelistBase64Content must be between {MIN_UPLOAD_BASE64_LEN} and {MAX_UPLOAD_BASE64_LEN} characters"
        )));
    }
    base64::engine::general_purpose::STANDARD
        .decode(base64_content)
        .map_err(|_| ServiceError::validation("whitelistBase64Content is not valid base64"))
}

/// Parses the required `pageSize` query parameter.
fn parse_page_size(raw: Option<&str>) -> Result<u32, ServiceError> {
    let raw = raw.ok_or_else(|| ServiceError::validation("pageSize is required"))?;
    raw.parse::<u32>()
        .map_err(|_| ServiceError::validation("pageSize must be an integer"))
}

fn require_param(value: Option<String>, name: &str) -> Result<String, ServiceError> {
    value.ok_or_else(|| ServiceError::validation(format!("{name} is required")))
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full router with CORS and request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/UploadWhitelist", post(upload_whitelist))
        .route("/Whitelist", delete(delete_whitelist))
        .route("/CreateMerkleTree", post(create_merkle_tree))
        .route("/MerkleTree", delete(delete_merkle_tree))
        .route("/MerkleTrees", get(get_merkle_trees))
        .route("/MerkleRoot", get(get_merkle_root))
        .route("/MerkleRoots", get(get_merkle_roots))
        .route("/MerkleProof", get(get_merkle_proof))
        .route("/MerkleProofs", get(get_merkle_proofs))
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — liveness probe for orchestrators.
async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// `POST /UploadWhitelist` — gate and store a whitelist CSV.
async fn upload_whitelist(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UploadWhitelistRequest>,
) -> Response {
    state.metrics.http_requests_total.inc();
    if let Err(e) = authorize(
        &state.config.auth.upload_whitelist,
        caller_groups(&headers).as_deref(),
    ) {
        return fail(&e);
    }

    let csv = match decode_csv_payload(&req.whitelist_base64_content) {
        Ok(bytes) => bytes,
        Err(e) => return fail(&e),
    };

    match state
        .lifecycle
        .upload_whitelist(&req.whitelist_name, &csv, req.allow_overwrite)
        .await
    {
        Ok(rows) => {
            state.metrics.whitelists_uploaded_total.inc();
            ok(json!({ "whitelistName": req.whitelist_name, "rowCount": rows }))
        }
        Err(e) => fail(&e),
    }
}

/// `DELETE /Whitelist` — remove a CSV with no tree over it.
async fn delete_whitelist(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<WhitelistNameRequest>,
) -> Response {
    state.metrics.http_requests_total.inc();
    if let Err(e) = authorize(
        &state.config.auth.delete_whitelist,
        caller_groups(&headers).as_deref(),
    ) {
        return fail(&e);
    }

    match state.lifecycle.delete_whitelist(&req.whitelist_name).await {
        Ok(()) => {
            state.metrics.whitelists_deleted_total.inc();
            ok(json!({ "whitelistName": req.whitelist_name }))
        }
        Err(e) => fail(&e),
    }
}

/// `POST /CreateMerkleTree` — run the full create protocol.
async fn create_merkle_tree(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<WhitelistNameRequest>,
) -> Response {
    state.metrics.http_requests_total.inc();
    if let Err(e) = authorize(
        &state.config.auth.create_merkle_tree,
        caller_groups(&headers).as_deref(),
    ) {
        return fail(&e);
    }

    let started = Instant::now();
    match state.lifecycle.create_tree(&req.whitelist_name).await {
        Ok(created) => {
            state.metrics.trees_created_total.inc();
            state
                .metrics
                .proof_rows_written_total
                .inc_by(created.entry_count as u64);
            state
                .metrics
                .tree_build_seconds
                .observe(started.elapsed().as_secs_f64());
            ok(json!({
                "whitelistName": req.whitelist_name,
                "merkleRoot": created.merkle_root,
                "entryCount": created.entry_count,
            }))
        }
        Err(e) => fail(&e),
    }
}

/// `DELETE /MerkleTree` — run the full delete protocol.
async fn delete_merkle_tree(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<WhitelistNameRequest>,
) -> Response {
    state.metrics.http_requests_total.inc();
    if let Err(e) = authorize(
        &state.config.auth.delete_merkle_tree,
        caller_groups(&headers).as_deref(),
    ) {
        return fail(&e);
    }

    match state.lifecycle.delete_tree(&req.whitelist_name).await {
        Ok(()) => {
            state.metrics.trees_deleted_total.inc();
            ok(json!({ "whitelistName": req.whitelist_name }))
        }
        Err(e) => fail(&e),
    }
}

/// `GET /MerkleTrees` — paginated name-only catalog. Open to anonymous
/// callers; this is the one listing that leaks nothing but names.
async fn get_merkle_trees(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Response {
    state.metrics.http_requests_total.inc();

    let page_size = match parse_page_size(query.page_size.as_deref()) {
        Ok(n) => n,
        Err(e) => return fail(&e),
    };
    match state
        .reader
        .get_merkle_trees(page_size, query.starting_token.as_deref())
        .await
    {
        Ok(page) => {
            let trees: Vec<_> = page
                .whitelist_names
                .into_iter()
                .map(|name| json!({ "WhitelistName": name }))
                .collect();
            let mut data = json!({ "merkleTrees": trees });
            if let Some(token) = page.next_token {
                data["nextStartingToken"] = json!(token);
            }
            ok(data)
        }
        Err(e) => fail(&e),
    }
}

/// `GET /MerkleRoot` — one root row, any status.
async fn get_merkle_root(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<NameQuery>,
) -> Response {
    state.metrics.http_requests_total.inc();
    if let Err(e) = authorize(
        &state.config.auth.get_merkle_root,
        caller_groups(&headers).as_deref(),
    ) {
        return fail(&e);
    }

    let name = match require_param(query.whitelist_name, "whitelistName") {
        Ok(n) => n,
        Err(e) => return fail(&e),
    };
    match state.reader.get_merkle_root(&name).await {
        Ok(Some(record)) => ok(json!(record)),
        Ok(None) => fail(&ServiceError::ResourceNotFound(format!(
            "merkle root for {name} not found"
        ))),
        Err(e) => fail(&e),
    }
}

/// `GET /MerkleRoots` — paginated root catalog.
async fn get_merkle_roots(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> Response {
    state.metrics.http_requests_total.inc();
    if let Err(e) = authorize(
        &state.config.auth.get_merkle_roots,
        caller_groups(&headers).as_deref(),
    ) {
        return fail(&e);
    }

    let page_size = match parse_page_size(query.page_size.as_deref()) {
        Ok(n) => n,
        Err(e) => return fail(&e),
    };
    match state
        .reader
        .get_merkle_roots(page_size, query.starting_token.as_deref())
        .await
    {
        Ok(page) => {
            let mut data = json!({ "merkleRoots": page.roots });
            if let Some(token) = page.next_token {
                data["nextStartingToken"] = json!(token);
            }
            ok(data)
        }
        Err(e) => fail(&e),
    }
}

/// `GET /MerkleProof` — one proof row of a COMPLETED tree. Open: a proof is
/// only useful to the key holder it names, and the verifier is public
/// anyway.
async fn get_merkle_proof(
    State(state): State<AppState>,
    Query(query): Query<ProofQuery>,
) -> Response {
    state.metrics.http_requests_total.inc();

    let name = match require_param(query.whitelist_name, "whitelistName") {
        Ok(n) => n,
        Err(e) => return fail(&e),
    };
    let address = match require_param(query.whitelist_address, "whitelistAddress") {
        Ok(a) => a,
        Err(e) => return fail(&e),
    };
    match state.reader.get_merkle_proof(&name, &address).await {
        Ok(Some(record)) => ok(json!(record)),
        Ok(None) => fail(&ServiceError::ResourceNotFound(format!(
            "no proof for {address} in {name}"
        ))),
        Err(e) => fail(&e),
    }
}

/// `GET /MerkleProofs` — every proof row of a COMPLETED tree.
async fn get_merkle_proofs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<NameQuery>,
) -> Response {
    state.metrics.http_requests_total.inc();
    if let Err(e) = authorize(
        &state.config.auth.get_merkle_proofs,
        caller_groups(&headers).as_deref(),
    ) {
        return fail(&e);
    }

    let name = match require_param(query.whitelist_name, "whitelistName") {
        Ok(n) => n,
        Err(e) => return fail(&e),
    };
    match state.reader.get_merkle_proofs(&name).await {
        Ok(records) => ok(json!({ "merkleProofs": records })),
        Err(e) => fail(&e),
    }
}
