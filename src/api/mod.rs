/// HTTP API Layer
///
/// REST endpoints for workflow definition management, queue operations
/// and the webhook/manual trigger adapters.

// Workflow definition CRUD + executor catalog
pub mod workflows;

// Queue management operations
pub mod queue;

// Webhook trigger adapter
pub mod webhooks;

pub use workflows::AppState;
