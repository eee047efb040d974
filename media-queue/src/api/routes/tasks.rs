//! Queue control routes.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
};

use crate::api::error::ApiResult;
use crate::api::models::{ClearFailedResponse, EnqueueRequest, RemoveResponse, StopResponse};
use crate::api::server::AppState;
use crate::domain::{JobId, TaskState, TaskStatus};
use crate::worker::QueueStatus;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/tasks", get(queue_status).post(enqueue_task))
        .route("/api/tasks/failed", delete(clear_failed))
        .route("/api/tasks/{id}", delete(remove_task))
        .route("/api/status", get(queue_status))
        .route("/api/stop", post(request_stop))
}

async fn enqueue_task(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> ApiResult<(StatusCode, Json<TaskStatus>)> {
    let id = state.orchestrator.enqueue(&request.id).await?;
    let status = state
        .orchestrator
        .status_registry()
        .status_or(&id, TaskState::Pending);
    Ok((StatusCode::CREATED, Json(status)))
}

async fn queue_status(State(state): State<AppState>) -> ApiResult<Json<QueueStatus>> {
    Ok(Json(state.orchestrator.status().await?))
}

async fn remove_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RemoveResponse>> {
    let id = JobId::parse(&id)?;
    let removed = state.orchestrator.remove(id.as_str()).await?;
    Ok(Json(RemoveResponse { id, removed }))
}

async fn request_stop(State(state): State<AppState>) -> (StatusCode, Json<StopResponse>) {
    let active = state.orchestrator.request_stop();
    let message = if active {
        "Stopping current task".to_string()
    } else {
        "No task is running".to_string()
    };
    (StatusCode::ACCEPTED, Json(StopResponse { active, message }))
}

async fn clear_failed(State(state): State<AppState>) -> ApiResult<Json<ClearFailedResponse>> {
    let cleared = state.orchestrator.clear_failed_history().await?;
    Ok(Json(ClearFailedResponse { cleared }))
}
