/// Webhook trigger endpoints
///
/// The webhook trigger adapter: an incoming request is matched against the
/// workflow's declared webhook paths and turned into a queue item. The
/// request returns as soon as the item is durable; execution happens on
/// the queue workers.

use crate::api::workflows::{error_response, AppState};
use crate::queue::store::EnqueueRequest;
use crate::queue::types::Priority;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{any, Router},
};
use chrono::Utc;
use serde_json::{json, Value};

/// Create webhook trigger routes.
pub fn create_webhook_routes() -> Router<AppState> {
    Router::new()
        // Catch-all route: /webhook/{workflow_id}/{declared_path}
        .route("/webhook/{workflow_id}/{*path}", any(trigger_webhook))
}

/// Enqueue a workflow run from a webhook call.
///
/// POST/GET/PUT/DELETE /webhook/{workflow_id}/{path}
/// Body: JSON payload that becomes the run's trigger data.
async fn trigger_webhook(
    State(state): State<AppState>,
    Path((workflow_id, path)): Path<(String, String)>,
    body: String,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    tracing::info!("📥 Webhook request received: {}/{}", workflow_id, path);

    let Some(compiled) = state.definitions.get(&workflow_id) else {
        return Err(error_response(
            StatusCode::NOT_FOUND,
            vec![format!("workflow '{workflow_id}' not found")],
        ));
    };

    // The workflow must declare this path on one of its webhook nodes.
    let normalized = format!("/{}", path.trim_start_matches('/'));
    if !compiled.webhook_paths.iter().any(|p| p == &normalized) {
        return Err(error_response(
            StatusCode::NOT_FOUND,
            vec![format!(
                "workflow '{workflow_id}' has no webhook at '{normalized}'"
            )],
        ));
    }

    // Tolerate non-JSON bodies; they arrive as a raw string payload.
    let payload: Value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&body).unwrap_or(Value::String(body))
    };

    let request = EnqueueRequest {
        workflow_id: workflow_id.clone(),
        workflow_name: compiled.definition.name.clone(),
        trigger_data: json!({
            "trigger_type": "webhook",
            "path": normalized,
            "payload": payload,
            "fired_at": Utc::now().to_rfc3339(),
        }),
        priority: Priority::Normal,
        scheduled_at: None,
        max_retries: state.queue_config.default_max_retries,
        serialize_runs: compiled.definition.serialize_runs,
    };

    match state.store.enqueue(request).await {
        Ok(item) => Ok(Json(json!({
            "queue_item_id": item.id,
            "status": item.status,
        }))),
        Err(e) => {
            tracing::error!("Failed to enqueue webhook run: {}", e);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                vec![e.to_string()],
            ))
        }
    }
}
