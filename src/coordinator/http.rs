//! HTTP admin API for the coordinator
//!
//! Files are created and their replica sets changed through this API. Replica
//! changes block until the reconfiguration job finishes and answer with the
//! installed replica set or the classified error record.

use crate::common::metrics::METRICS;
use crate::common::{Error, Result};
use crate::coordinator::classify::{Errno, ErrorRecord, ErrorType};
use crate::coordinator::operations::ReplicaOperations;
use crate::coordinator::stage::StageHandle;
use crate::coordinator::xloc::{Replica, ReplicaSet, StripingPolicy, UpdatePolicy};
use crate::coordinator::xloc_coordinator::{Completion, JobOutcome};
use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Admin requests only carry replica lists
const MAX_REQUEST_BODY: usize = 64 * 1024;

#[derive(Clone)]
pub struct CoordState {
    pub node_id: String,
    pub stage: StageHandle,
    pub operations: Arc<ReplicaOperations>,
    pub started_at: Instant,
}

impl CoordState {
    pub fn new(node_id: impl Into<String>, stage: StageHandle, operations: Arc<ReplicaOperations>) -> Self {
        Self {
            node_id: node_id.into(),
            stage,
            operations,
            started_at: Instant::now(),
        }
    }

    fn error_response(&self, file_id: &str, err: &Error) -> Response {
        self.operations.classifier().report(file_id, err).into_response()
    }
}

/// A replica as sent by clients. Striping defaults to one stripe per OSD.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaSpec {
    pub osd_uuids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub striping: Option<StripingPolicy>,
    #[serde(default)]
    pub flags: u32,
}

impl ReplicaSpec {
    pub fn into_replica(self) -> Result<Replica> {
        let striping = self.striping.unwrap_or(StripingPolicy {
            width: self.osd_uuids.len() as u32,
            ..StripingPolicy::default()
        });
        Replica::new(self.osd_uuids, striping, self.flags)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFileRequest {
    pub file_id: String,
    pub update_policy: String,
    pub replicas: Vec<ReplicaSpec>,
    #[serde(default)]
    pub read_only_file_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddReplicasRequest {
    pub replicas: Vec<ReplicaSpec>,
}

fn to_replicas(specs: Vec<ReplicaSpec>) -> Result<Vec<Replica>> {
    specs.into_iter().map(ReplicaSpec::into_replica).collect()
}

impl IntoResponse for ErrorRecord {
    fn into_response(self) -> Response {
        let status = match (self.error_type, self.errno) {
            (ErrorType::Errno, Some(Errno::EPERM)) => StatusCode::FORBIDDEN,
            (ErrorType::Errno, Some(Errno::ENOENT)) => StatusCode::NOT_FOUND,
            (ErrorType::Errno, Some(Errno::EINVAL)) => StatusCode::BAD_REQUEST,
            (ErrorType::Errno, Some(Errno::EAGAIN)) => StatusCode::CONFLICT,
            (ErrorType::Redirect, _) => StatusCode::TEMPORARY_REDIRECT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let location = self.redirect_to.as_deref().map(redirect_location);

        let mut response = (status, axum::Json(self)).into_response();
        if let Some(value) = location.and_then(|l| HeaderValue::from_str(&l).ok()) {
            response.headers_mut().insert(header::LOCATION, value);
        }
        response
    }
}

fn redirect_location(target: &str) -> String {
    if target.contains("://") {
        target.to_string()
    } else {
        format!("http://{}", target)
    }
}

/// Creates the HTTP router with all admin endpoints.
pub fn create_router(state: CoordState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health))
        .route("/metrics", axum::routing::get(metrics))
        .route(
            "/files",
            axum::routing::get(list_files).post(create_file),
        )
        .route("/files/:file_id", axum::routing::get(get_file))
        .route("/files/:file_id/replicas", axum::routing::post(add_replicas))
        .route(
            "/files/:file_id/replicas/:osd_uuid",
            axum::routing::delete(remove_replica),
        )
        .route(
            "/files/:file_id/revalidate",
            axum::routing::post(revalidate),
        )
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<CoordState>) -> impl IntoResponse {
    axum::Json(json!({
        "status": "ok",
        "node_id": state.node_id,
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        METRICS.to_prometheus(),
    )
}

async fn list_files(State(state): State<CoordState>) -> Response {
    match state.stage.call("", |store| store.list_files()).await {
        Ok(Ok(files)) => axum::Json(json!({ "files": files })).into_response(),
        Ok(Err(e)) | Err(e) => state.error_response("", &e),
    }
}

async fn create_file(
    State(state): State<CoordState>,
    axum::Json(req): axum::Json<CreateFileRequest>,
) -> Response {
    let file_id = req.file_id.clone();
    let xloc = match build_xloc(req) {
        Ok(xloc) => xloc,
        Err(e) => return state.error_response(&file_id, &e),
    };

    let ops = state.operations.clone();
    let id = file_id.clone();
    let created = state
        .stage
        .call(&file_id, move |store| ops.create_file(store, &id, xloc))
        .await;
    match created {
        Ok(Ok(file)) => (StatusCode::CREATED, axum::Json(json!(file))).into_response(),
        Ok(Err(e)) | Err(e) => state.error_response(&file_id, &e),
    }
}

fn build_xloc(req: CreateFileRequest) -> Result<ReplicaSet> {
    let policy: UpdatePolicy = req.update_policy.parse()?;
    let replicas = to_replicas(req.replicas)?;
    Ok(ReplicaSet::new(replicas, 0, policy)?.with_read_only_file_size(req.read_only_file_size))
}

async fn get_file(State(state): State<CoordState>, Path(file_id): Path<String>) -> Response {
    let ops = state.operations.clone();
    let id = file_id.clone();
    let found = state
        .stage
        .call(&file_id, move |store| -> Result<_> {
            let file = store.require_file(&id)?;
            let lock = ops.locks().inspect(store, &id)?;
            Ok((file, lock))
        })
        .await;
    match found {
        Ok(Ok((file, lock))) => axum::Json(json!({ "file": file, "lock": lock })).into_response(),
        Ok(Err(e)) | Err(e) => state.error_response(&file_id, &e),
    }
}

async fn add_replicas(
    State(state): State<CoordState>,
    Path(file_id): Path<String>,
    axum::Json(req): axum::Json<AddReplicasRequest>,
) -> Response {
    let replicas = match to_replicas(req.replicas) {
        Ok(replicas) => replicas,
        Err(e) => return state.error_response(&file_id, &e),
    };

    let (completion, rx) = Completion::channel();
    let ops = state.operations.clone();
    let id = file_id.clone();
    let queued = state.stage.enqueue_internal_callback(&file_id, move |store| {
        ops.add_replicas(store, &id, replicas, completion)
    });
    if let Err(e) = queued {
        return state.error_response(&file_id, &e);
    }
    outcome_response(&file_id, rx).await
}

async fn remove_replica(
    State(state): State<CoordState>,
    Path((file_id, osd_uuid)): Path<(String, String)>,
) -> Response {
    let (completion, rx) = Completion::channel();
    let ops = state.operations.clone();
    let id = file_id.clone();
    let queued = state.stage.enqueue_internal_callback(&file_id, move |store| {
        ops.remove_replica(store, &id, &osd_uuid, completion)
    });
    if let Err(e) = queued {
        return state.error_response(&file_id, &e);
    }
    outcome_response(&file_id, rx).await
}

async fn outcome_response(file_id: &str, rx: oneshot::Receiver<JobOutcome>) -> Response {
    match rx.await {
        Ok(Ok(xloc)) => axum::Json(json!({ "file_id": file_id, "xloc": xloc })).into_response(),
        Ok(Err(record)) => record.into_response(),
        Err(_) => ErrorRecord::internal(format!(
            "replica set change of {} ended without an outcome",
            file_id
        ))
        .into_response(),
    }
}

async fn revalidate(State(state): State<CoordState>, Path(file_id): Path<String>) -> Response {
    let ops = state.operations.clone();
    let id = file_id.clone();
    let revalidated = state
        .stage
        .call(&file_id, move |store| ops.revalidate(store, &id))
        .await;
    match revalidated {
        Ok(Ok(file)) => axum::Json(json!({ "file": file })).into_response(),
        Ok(Err(e)) | Err(e) => state.error_response(&file_id, &e),
    }
}
