/// Workflow Management Layer
///
/// This module handles workflow definitions, persistence and the
/// hot-reload registry:
/// - Type definitions (WorkflowDefinition, NodeDescriptor, branching refs)
/// - Executor config schemas and violation-collecting validation
/// - SQLite persistence with sqlx
/// - Lock-free hot-reload registry using ArcSwap

// Definition and node descriptor types
pub mod types;

// Executor config schemas and validation
pub mod schema;

// SQLite persistence layer for definitions
pub mod storage;

// Hot-reload registry using ArcSwap
pub mod registry;

// Re-export commonly used types
pub use registry::{CompiledDefinition, DefinitionRegistry};
pub use schema::{ConfigSchema, PropertySpec, PropertyType};
pub use types::{NodeDescriptor, NodeRole, WorkflowDefinition};
