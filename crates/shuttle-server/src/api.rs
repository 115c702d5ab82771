//! HTTP router and handlers.
//!
//! Every handler is a thin call into `Runtime`. Failures come back as
//! `(status, {"error": message})` with the status taken from `SchedulerError`.

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use shuttle_core::app::{
    CompletionAck, ConfigUpdate, ConnectionTest, HeartbeatAck, LeaseGrant, LeaseRequest, Runtime,
    RuntimeStats, WorkerDetail,
};
use shuttle_core::domain::{
    AuditEvent, CompletionReport, Lease, LeaseStatus, NewTask, SchedulerError, Task, TaskId,
    TaskResult, TaskStatus, WorkerId, WorkerNode, WorkerPatch,
};
use shuttle_core::upstream::{ConnectivitySnapshot, RuntimeConfigView};

pub type AppState = Arc<Runtime>;

const DEFAULT_AUDIT_LIMIT: usize = 100;
const MAX_AUDIT_LIMIT: usize = 1000;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub struct ApiError(SchedulerError);

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self.0, "request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/{id}", get(get_task))
        .route("/tasks/{id}/lease", post(lease_task))
        .route("/tasks/{id}/heartbeat", post(heartbeat))
        .route("/tasks/{id}/complete", post(complete_task))
        .route("/tasks/{id}/requeue", post(requeue_task))
        .route("/tasks/{id}/results", get(task_results))
        .route("/leases", get(list_leases))
        .route("/workers", get(list_workers).post(upsert_worker))
        .route("/workers/{id}", get(get_worker).delete(remove_worker))
        .route("/stats", get(stats))
        .route("/audit", get(audit))
        .route("/runtime/config", get(get_config).post(update_config))
        .route("/runtime/test-connection", post(test_connection))
        .route("/runtime/connectivity", get(connectivity))
        .with_state(state)
}

// ── helpers ─────────────────────────────────────────────────────────

/// JSON body errors are validation errors (400), not axum's 422.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> ApiResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| SchedulerError::validation(format!("invalid request body: {e}")).into())
}

fn task_id(raw: &str) -> ApiResult<TaskId> {
    raw.parse()
        .map_err(|_| SchedulerError::not_found(format!("Task {raw} not found")).into())
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    pub status: Option<String>,
}

fn parse_status<S: std::str::FromStr<Err = String>>(raw: Option<&str>) -> ApiResult<Option<S>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|e: String| SchedulerError::validation(e).into()),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
}

// ── handlers ────────────────────────────────────────────────────────

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn create_task(
    State(rt): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let input: NewTask = parse_body(&body)?;
    let task = rt.submit(input).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn list_tasks(
    State(rt): State<AppState>,
    Query(q): Query<StatusQuery>,
) -> ApiResult<Json<Vec<Task>>> {
    let status: Option<TaskStatus> = parse_status(q.status.as_deref())?;
    Ok(Json(rt.list_tasks(status).await?))
}

async fn get_task(State(rt): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Task>> {
    Ok(Json(rt.get_task(task_id(&id)?).await?))
}

async fn lease_task(
    State(rt): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<LeaseGrant>)> {
    let id = task_id(&id)?;
    let request: LeaseRequest = if body.iter().all(u8::is_ascii_whitespace) {
        LeaseRequest::default()
    } else {
        parse_body(&body)?
    };
    let grant = rt.lease_task(id, request).await?;
    Ok((StatusCode::CREATED, Json(grant)))
}

async fn heartbeat(
    State(rt): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<HeartbeatAck>> {
    Ok(Json(rt.heartbeat(task_id(&id)?).await?))
}

async fn complete_task(
    State(rt): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<CompletionAck>> {
    let id = task_id(&id)?;
    let report: CompletionReport = parse_body(&body)?;
    Ok(Json(rt.complete(id, report).await?))
}

async fn requeue_task(
    State(rt): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Task>> {
    Ok(Json(rt.requeue(task_id(&id)?).await?))
}

async fn task_results(
    State(rt): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<TaskResult>>> {
    Ok(Json(rt.list_results(task_id(&id)?).await?))
}

async fn list_leases(
    State(rt): State<AppState>,
    Query(q): Query<StatusQuery>,
) -> ApiResult<Json<Vec<Lease>>> {
    let status: Option<LeaseStatus> = parse_status(q.status.as_deref())?;
    Ok(Json(rt.list_leases(status).await?))
}

async fn list_workers(State(rt): State<AppState>) -> ApiResult<Json<Vec<WorkerNode>>> {
    Ok(Json(rt.list_workers().await?))
}

async fn upsert_worker(
    State(rt): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<WorkerNode>> {
    let patch: WorkerPatch = parse_body(&body)?;
    Ok(Json(rt.upsert_worker(patch).await?))
}

async fn get_worker(
    State(rt): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkerDetail>> {
    Ok(Json(rt.get_worker(&WorkerId::new(id)).await?))
}

async fn remove_worker(
    State(rt): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    rt.remove_worker(&WorkerId::new(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stats(State(rt): State<AppState>) -> ApiResult<Json<RuntimeStats>> {
    Ok(Json(rt.stats().await?))
}

async fn audit(
    State(rt): State<AppState>,
    Query(q): Query<AuditQuery>,
) -> Json<Vec<AuditEvent>> {
    let limit = q
        .limit
        .filter(|l| *l > 0)
        .unwrap_or(DEFAULT_AUDIT_LIMIT)
        .min(MAX_AUDIT_LIMIT);
    Json(rt.audit(limit).await)
}

async fn get_config(State(rt): State<AppState>) -> Json<RuntimeConfigView> {
    Json(rt.config_view().await)
}

async fn update_config(
    State(rt): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<RuntimeConfigView>> {
    let update: ConfigUpdate = parse_body(&body)?;
    Ok(Json(rt.update_config(update).await?))
}

async fn test_connection(State(rt): State<AppState>) -> Json<ConnectionTest> {
    Json(rt.test_connection().await)
}

async fn connectivity(State(rt): State<AppState>) -> Json<ConnectivitySnapshot> {
    Json(rt.connectivity().await)
}
