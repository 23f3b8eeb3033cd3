/// Execution queue REST API endpoints
///
/// The operator surface over the queue: enqueue (manual trigger), batch
/// drain, bulk retry/clear, pause/resume, stats and single-item
/// operations. Single-item operations go through the store's guarded
/// transitions, so an illegal request (cancelling a completed item, say)
/// comes back as a conflict instead of silently corrupting state.

use crate::api::workflows::{error_response, AppState};
use crate::error::EngineError;
use crate::queue::stats::collect_stats;
use crate::queue::store::EnqueueRequest;
use crate::queue::types::{Priority, QueueStatus};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

/// Create queue management routes.
pub fn create_queue_routes() -> Router<AppState> {
    Router::new()
        .route("/api/queue", post(enqueue_item))
        .route("/api/queue", get(list_queue))
        .route("/api/queue/process", post(process_queue))
        .route("/api/queue/status", get(queue_status))
        .route("/api/queue/stats", get(queue_stats))
        .route("/api/queue/retry-failed", post(retry_failed))
        .route("/api/queue/retry-all", post(retry_all))
        .route("/api/queue/clear", post(clear_queue))
        .route("/api/queue/pause", post(pause_queue))
        .route("/api/queue/resume", post(resume_queue))
        .route("/api/queue/{id}", get(get_item))
        .route("/api/queue/{id}/cancel", post(cancel_item))
        .route("/api/queue/{id}/retry", post(retry_item))
        .route("/api/queue/{id}/priority", post(update_priority))
}

/// Map engine errors onto HTTP statuses.
fn map_engine_error(e: EngineError) -> (StatusCode, Json<Value>) {
    let status = match &e {
        EngineError::UnknownQueueItem(_) | EngineError::UnknownWorkflow(_) => StatusCode::NOT_FOUND,
        EngineError::InvalidStateTransition { .. }
        | EngineError::RetryBudgetExhausted { .. }
        | EngineError::ItemNotUpdatable { .. } => StatusCode::CONFLICT,
        EngineError::ConfigValidation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, vec![e.to_string()])
}

/// Request body for enqueueing a run (the manual trigger adapter).
#[derive(Debug, Deserialize)]
struct EnqueueBody {
    workflow_id: String,
    #[serde(default)]
    trigger_data: Option<Value>,
    #[serde(default)]
    priority: Option<Priority>,
    /// RFC 3339; omit to run immediately.
    #[serde(default)]
    scheduled_at: Option<String>,
    #[serde(default)]
    max_retries: Option<u32>,
}

/// POST /api/queue: enqueue a workflow run.
async fn enqueue_item(
    State(state): State<AppState>,
    Json(body): Json<EnqueueBody>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let Some(compiled) = state.definitions.get(&body.workflow_id) else {
        return Err(error_response(
            StatusCode::NOT_FOUND,
            vec![format!("workflow '{}' not found", body.workflow_id)],
        ));
    };

    let scheduled_at = match body.scheduled_at.as_deref() {
        None => None,
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(dt) => Some(dt.with_timezone(&Utc)),
            Err(e) => {
                return Err(error_response(
                    StatusCode::BAD_REQUEST,
                    vec![format!("invalid scheduled_at: {e}")],
                ))
            }
        },
    };

    let request = EnqueueRequest {
        workflow_id: body.workflow_id.clone(),
        workflow_name: compiled.definition.name.clone(),
        trigger_data: body.trigger_data.unwrap_or_else(|| {
            json!({ "trigger_type": "manual", "fired_at": Utc::now().to_rfc3339() })
        }),
        priority: body.priority.unwrap_or_default(),
        scheduled_at,
        max_retries: body
            .max_retries
            .unwrap_or(state.queue_config.default_max_retries),
        serialize_runs: compiled.definition.serialize_runs,
    };

    let item = state.store.enqueue(request).await.map_err(map_engine_error)?;

    Ok(Json(json!({
        "queue_item_id": item.id,
        "status": item.status,
        "scheduled_at": item.scheduled_at,
    })))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
}

/// GET /api/queue: list items, optionally filtered by status.
async fn list_queue(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let status = match params.status.as_deref() {
        None => None,
        Some(raw) => match QueueStatus::parse(raw) {
            Some(status) => Some(status),
            None => {
                return Err(error_response(
                    StatusCode::BAD_REQUEST,
                    vec![format!("unknown status '{raw}'")],
                ))
            }
        },
    };

    let items = state
        .store
        .list(status, params.limit.unwrap_or(100).clamp(1, 1000))
        .await
        .map_err(map_engine_error)?;

    Ok(Json(json!({ "items": items })))
}

/// POST /api/queue/process: drain currently-eligible items once.
async fn process_queue(State(state): State<AppState>) -> Json<Value> {
    let report = state.processor.process_queue().await;
    Json(json!(report))
}

/// GET /api/queue/status: latest durable queue state.
async fn queue_status(State(state): State<AppState>) -> Json<Value> {
    let status = state.processor.status().await;
    Json(json!(status))
}

/// GET /api/queue/stats: derived, diagnostic-only statistics.
async fn queue_stats(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let stats = collect_stats(state.store.pool())
        .await
        .map_err(map_engine_error)?;
    Ok(Json(json!(stats)))
}

/// POST /api/queue/retry-failed: re-enqueue failed items with budget left.
async fn retry_failed(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let report = state.store.retry_failed().await.map_err(map_engine_error)?;
    Ok(Json(json!(report)))
}

/// POST /api/queue/retry-all: operator override, budget reset included.
async fn retry_all(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let report = state.store.retry_all().await.map_err(map_engine_error)?;
    Ok(Json(json!(report)))
}

/// POST /api/queue/clear: remove all pending and failed items.
async fn clear_queue(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let report = state.store.clear().await.map_err(map_engine_error)?;
    Ok(Json(json!(report)))
}

/// POST /api/queue/pause: stop background claiming.
async fn pause_queue(State(state): State<AppState>) -> Json<Value> {
    state.processor.pause();
    Json(json!({ "paused": true }))
}

/// POST /api/queue/resume: resume background claiming.
async fn resume_queue(State(state): State<AppState>) -> Json<Value> {
    state.processor.resume();
    Json(json!({ "paused": false }))
}

/// GET /api/queue/{id}: fetch one item.
async fn get_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.store.get(&id).await.map_err(map_engine_error)? {
        Some(item) => Ok(Json(json!(item))),
        None => Err(error_response(
            StatusCode::NOT_FOUND,
            vec![format!("queue item '{id}' not found")],
        )),
    }
}

/// POST /api/queue/{id}/cancel: cancel a pending or processing item.
async fn cancel_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let outcome = state
        .store
        .request_cancel(&id)
        .await
        .map_err(map_engine_error)?;
    Ok(Json(json!({ "id": id, "outcome": outcome })))
}

/// POST /api/queue/{id}/retry: operator retry of a failed item.
async fn retry_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state.store.retry_item(&id).await.map_err(map_engine_error)?;
    Ok(Json(json!({ "id": id, "status": QueueStatus::Pending })))
}

#[derive(Debug, Deserialize)]
struct PriorityBody {
    priority: Priority,
}

/// POST /api/queue/{id}/priority: change a waiting item's priority.
async fn update_priority(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PriorityBody>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state
        .store
        .update_priority(&id, body.priority)
        .await
        .map_err(map_engine_error)?;
    Ok(Json(json!({ "id": id, "priority": body.priority })))
}
