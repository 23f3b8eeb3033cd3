/// Workflow management REST API endpoints
///
/// CRUD for workflow definitions with hot-reload support: every write
/// lands in storage, swaps the in-memory registry and re-syncs schedule
/// trigger jobs, so changes take effect without a restart.

use crate::{
    config::QueueConfig,
    queue::{processor::QueueProcessor, store::QueueStore},
    runtime::{registry::ExecutorRegistry, scheduler::ScheduleTriggerService},
    workflow::{registry::DefinitionRegistry, storage::DefinitionStorage, types::WorkflowDefinition},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Application state containing shared resources.
#[derive(Clone)]
pub struct AppState {
    pub storage: DefinitionStorage,
    pub definitions: Arc<DefinitionRegistry>,
    pub schedules: Arc<ScheduleTriggerService>,
    pub store: QueueStore,
    pub processor: Arc<QueueProcessor>,
    pub executors: Arc<ExecutorRegistry>,
    pub queue_config: QueueConfig,
}

/// Standard error payload: status code plus an errors array, so bulk and
/// validation failures surface every detail instead of a bare status.
pub fn error_response(
    status: StatusCode,
    errors: Vec<String>,
) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "errors": errors })))
}

/// Request body for workflow creation/update.
#[derive(Debug, Deserialize)]
pub struct SaveWorkflowRequest {
    pub workflow: WorkflowDefinition,
}

/// Create workflow management routes.
pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", post(create_workflow))
        .route("/api/workflows", get(list_workflows))
        .route("/api/workflows/{id}", get(get_workflow))
        .route("/api/workflows/{id}", put(update_workflow))
        .route("/api/workflows/{id}", delete(delete_workflow))
        .route("/api/workflows/{id}/validate", post(validate_workflow))
        .route("/api/executors", get(list_executors))
}

/// Create a new workflow definition.
///
/// POST /api/workflows
/// Body: { "workflow": { "id": "...", "name": "...", "nodes": [...] } }
async fn create_workflow(
    State(state): State<AppState>,
    Json(payload): Json<SaveWorkflowRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let workflow = payload.workflow;

    let problems = workflow.validate();
    if !problems.is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, problems));
    }

    match state.storage.get_definition(&workflow.id).await {
        Ok(Some(_)) => {
            return Err(error_response(
                StatusCode::CONFLICT,
                vec![format!("workflow '{}' already exists", workflow.id)],
            ))
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!("Failed to check workflow existence: {}", e);
            return Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                vec![e.to_string()],
            ));
        }
    }

    save_and_reload(&state, &workflow).await?;

    tracing::info!("🔥 Created workflow: {} ({})", workflow.id, workflow.name);

    Ok(Json(json!({
        "id": workflow.id,
        "message": format!("Workflow '{}' created successfully", workflow.name),
    })))
}

/// List all workflow definitions.
async fn list_workflows(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.storage.list_definitions().await {
        Ok(workflows) => Ok(Json(json!({ "workflows": workflows }))),
        Err(e) => {
            tracing::error!("Failed to list workflows: {}", e);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                vec![e.to_string()],
            ))
        }
    }
}

/// Get a specific workflow definition by id.
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowDefinition>, (StatusCode, Json<Value>)> {
    match state.storage.get_definition(&id).await {
        Ok(Some(workflow)) => Ok(Json(workflow)),
        Ok(None) => Err(error_response(
            StatusCode::NOT_FOUND,
            vec![format!("workflow '{id}' not found")],
        )),
        Err(e) => {
            tracing::error!("Failed to get workflow {}: {}", id, e);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                vec![e.to_string()],
            ))
        }
    }
}

/// Update an existing workflow definition.
async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<SaveWorkflowRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mut workflow = payload.workflow;
    workflow.id = id.clone();

    let problems = workflow.validate();
    if !problems.is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, problems));
    }

    match state.storage.get_definition(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return Err(error_response(
                StatusCode::NOT_FOUND,
                vec![format!("workflow '{id}' not found")],
            ))
        }
        Err(e) => {
            return Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                vec![e.to_string()],
            ))
        }
    }

    save_and_reload(&state, &workflow).await?;

    tracing::info!("🔥 Updated workflow: {}", workflow.id);

    Ok(Json(json!({
        "id": workflow.id,
        "message": format!("Workflow '{}' updated successfully", workflow.name),
    })))
}

/// Delete a workflow definition and its schedule jobs.
async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.storage.delete_definition(&id).await {
        Ok(true) => {
            state.definitions.remove(&id);
            state.schedules.remove_workflow_schedules(&id).await;
            tracing::info!("🗑️ Deleted workflow: {}", id);
            Ok(Json(json!({ "message": format!("Workflow '{id}' deleted") })))
        }
        Ok(false) => Err(error_response(
            StatusCode::NOT_FOUND,
            vec![format!("workflow '{id}' not found")],
        )),
        Err(e) => {
            tracing::error!("Failed to delete workflow {}: {}", id, e);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                vec![e.to_string()],
            ))
        }
    }
}

/// Validate a stored workflow without saving: structural problems plus
/// per-node config violations against the registered executor schemas.
async fn validate_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let workflow = match state.storage.get_definition(&id).await {
        Ok(Some(workflow)) => workflow,
        Ok(None) => {
            return Err(error_response(
                StatusCode::NOT_FOUND,
                vec![format!("workflow '{id}' not found")],
            ))
        }
        Err(e) => {
            return Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                vec![e.to_string()],
            ))
        }
    };

    let mut problems = workflow.validate();
    for node in &workflow.nodes {
        if node.role() == crate::workflow::types::NodeRole::Action {
            if let Err(e) = state
                .executors
                .validate_config(&node.id, &node.node_type, &node.config)
            {
                problems.push(e.to_string());
            }
        }
    }

    Ok(Json(json!({
        "is_valid": problems.is_empty(),
        "errors": problems,
    })))
}

/// Describe the registered executor catalog (schemas, capabilities,
/// health) for operator tooling.
async fn list_executors(State(state): State<AppState>) -> Json<Value> {
    let descriptors = state.executors.describe_all().await;
    Json(json!({ "executors": descriptors }))
}

async fn save_and_reload(
    state: &AppState,
    workflow: &WorkflowDefinition,
) -> Result<(), (StatusCode, Json<Value>)> {
    if let Err(e) = state.storage.save_definition(workflow).await {
        tracing::error!("Failed to save workflow: {}", e);
        return Err(error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            vec![e.to_string()],
        ));
    }

    if let Err(e) = state.definitions.reload_definition(&workflow.id).await {
        tracing::error!("Failed to reload workflow into registry: {}", e);
        return Err(error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            vec![e.to_string()],
        ));
    }

    if let Err(e) = state.schedules.sync_workflow_schedules(workflow).await {
        tracing::error!(
            "Failed to sync schedule triggers for workflow {}: {}",
            workflow.id,
            e
        );
        return Err(error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            vec![e.to_string()],
        ));
    }

    Ok(())
}
