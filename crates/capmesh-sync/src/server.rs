//! HTTP server side of the sync transport.
//!
//! Exposes the sync API consumed by [`crate::client::SyncClient`] on
//! remote instances and by external collaborators (agents, CLIs, UIs):
//!
//! - `GET  /identity` - handshake
//! - `GET  /records?since=<ms>` - pull a delta
//! - `POST /records` - push a manifest
//! - `GET/POST /peers`, `DELETE /peers/:endpoint` - registry management
//! - `POST /sync` - trigger an immediate round
//!
//! Callers that supply `senderInstanceId` and `senderEndpoint` are added
//! to the peer registry on first contact, so a one-sided configuration
//! becomes bidirectional after the first exchange.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use capmesh_core::{InstanceId, InstanceInfo};
use capmesh_store::{ApplyOutcome, RecordStore, StoreError};

use crate::coordinator::RoundReport;
use crate::manifest::{IdentityDocument, PullResponse, PushSummary, SyncManifest};
use crate::peers::{PeerDescriptor, PeerRegistry};
use crate::scheduler::Scheduler;

/// Shared state behind every handler.
pub struct ServerState {
    pub identity: InstanceInfo,
    pub store: Arc<dyn RecordStore>,
    pub peers: Arc<PeerRegistry>,
    pub scheduler: Arc<Scheduler>,
    /// When set, pushes must carry a valid signature over their records.
    pub require_signed_manifests: bool,
}

/// Error type for API responses.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.into().to_string(),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Build the sync API router.
pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/identity", get(get_identity))
        .route("/records", get(pull_records).post(push_records))
        .route("/peers", get(list_peers).post(add_peer))
        .route("/peers/:endpoint", delete(remove_peer))
        .route("/sync", post(trigger_sync))
        .with_state(state)
}

/// Serve the sync API on an already-bound listener.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: Arc<ServerState>,
) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "sync API listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

/// GET /identity - who this instance is and how far its store advanced.
async fn get_identity(State(state): State<Arc<ServerState>>) -> ApiResult<Json<IdentityDocument>> {
    let high_water_mark = state.store.high_water_mark().await?;
    Ok(Json(IdentityDocument {
        instance_id: state.identity.instance_id.clone(),
        instance_type: state.identity.instance_type.clone(),
        high_water_mark,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullQuery {
    since: Option<i64>,
    sender_instance_id: Option<String>,
    sender_endpoint: Option<String>,
}

/// GET /records?since=<ms> - the local delta since a watermark.
async fn pull_records(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<PullQuery>,
) -> ApiResult<Json<PullResponse>> {
    register_caller(
        &state,
        query.sender_instance_id.as_deref(),
        query.sender_endpoint.as_deref(),
    );

    let records = state.store.delta(query.since.unwrap_or(0)).await?;
    Ok(Json(PullResponse {
        sender_instance_id: state.identity.instance_id.clone(),
        records,
    }))
}

/// POST /records - apply a pushed manifest, returning the three tallies.
async fn push_records(
    State(state): State<Arc<ServerState>>,
    Json(manifest): Json<SyncManifest>,
) -> ApiResult<Json<PushSummary>> {
    manifest
        .validate_limits()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    if state.require_signed_manifests {
        manifest
            .verify_signature()
            .map_err(|e| ApiError::unauthorized(e.to_string()))?;
    }

    register_caller(
        &state,
        Some(manifest.sender_instance_id.as_str()),
        manifest.sender_endpoint.as_deref(),
    );

    let mut summary = PushSummary::default();
    for record in &manifest.records {
        match state.store.apply(record).await {
            Ok(ApplyOutcome::Applied) => summary.accepted += 1,
            Ok(ApplyOutcome::Superseded) => summary.superseded += 1,
            Err(StoreError::InvalidRecord(e)) => {
                warn!(
                    key = %record.key,
                    sender = %manifest.sender_instance_id,
                    error = %e,
                    "rejected pushed record"
                );
                summary.rejected += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    debug!(
        sender = %manifest.sender_instance_id,
        total = summary.total(),
        accepted = summary.accepted,
        "push applied"
    );
    Ok(Json(summary))
}

/// GET /peers - the registry, for observability.
async fn list_peers(State(state): State<Arc<ServerState>>) -> Json<Vec<PeerDescriptor>> {
    Json(state.peers.list())
}

#[derive(Deserialize)]
struct AddPeerRequest {
    endpoint: String,
}

/// POST /peers - add a peer by endpoint.
async fn add_peer(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<AddPeerRequest>,
) -> ApiResult<Json<PeerDescriptor>> {
    if request.endpoint.is_empty() {
        return Err(ApiError::bad_request("endpoint must not be empty"));
    }
    state.peers.add(&request.endpoint);
    state
        .peers
        .get(&request.endpoint)
        .map(Json)
        .ok_or_else(|| ApiError::bad_request("endpoint rejected"))
}

/// DELETE /peers/:endpoint - remove a peer. The endpoint arrives
/// percent-encoded and axum decodes it.
async fn remove_peer(
    State(state): State<Arc<ServerState>>,
    Path(endpoint): Path<String>,
) -> StatusCode {
    if state.peers.remove(&endpoint).is_some() {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

/// POST /sync - run a round now and report per-peer outcomes.
async fn trigger_sync(State(state): State<Arc<ServerState>>) -> Json<RoundReport> {
    Json(state.scheduler.sync_now().await)
}

/// Add an unsolicited caller to the registry when it told us how to reach
/// it back.
fn register_caller(state: &ServerState, instance_id: Option<&str>, endpoint: Option<&str>) {
    if let (Some(id), Some(endpoint)) = (instance_id, endpoint) {
        state
            .peers
            .observe_caller(endpoint, InstanceId::from_string(id.to_string()));
    }
}
