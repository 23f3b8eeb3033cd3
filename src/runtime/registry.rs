/// Executor registry using ArcSwap
///
/// Maps node type keys to executor implementations. Reads happen on every
/// node dispatch and are lock-free; registration clones the map and swaps
/// the pointer under a single-writer lock, so hot-adding an integration
/// never stalls running workers.

use arc_swap::ArcSwap;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::EngineError;
use crate::runtime::executor::{
    DelayExecutor, HttpRequestExecutor, LogMessageExecutor, NodeExecutor, TransformExecutor,
};
use crate::workflow::schema::ConfigSchema;

/// Registry entry surfaced to operator tooling.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutorDescriptor {
    pub node_type: String,
    pub config_schema: ConfigSchema,
    pub capabilities: Vec<&'static str>,
    pub healthy: bool,
}

/// Lock-free executor registry.
pub struct ExecutorRegistry {
    executors: ArcSwap<HashMap<String, Arc<dyn NodeExecutor>>>,
    // Registration is single-writer: concurrent clone-and-swap updates
    // would silently drop each other's entries.
    write_lock: Mutex<()>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: ArcSwap::new(Arc::new(HashMap::new())),
            write_lock: Mutex::new(()),
        }
    }

    /// Registry pre-populated with the built-in executor catalog. Domain
    /// integrations are registered on top by the embedding application.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(HttpRequestExecutor::new()));
        registry.register(Arc::new(DelayExecutor));
        registry.register(Arc::new(TransformExecutor));
        registry.register(Arc::new(LogMessageExecutor));
        registry
    }

    /// Register or replace an executor for its type key.
    pub fn register(&self, executor: Arc<dyn NodeExecutor>) {
        let _guard = self.write_lock.lock().unwrap();

        let current = self.executors.load();
        let mut next = (**current).clone();
        let type_key = executor.node_type().to_string();
        next.insert(type_key.clone(), executor);
        self.executors.store(Arc::new(next));

        tracing::info!("⚙️ Registered executor type: {}", type_key);
    }

    /// Lock-free executor lookup.
    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.load().get(node_type).cloned()
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.executors.load().contains_key(node_type)
    }

    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.executors.load().keys().cloned().collect();
        types.sort();
        types
    }

    /// Validate a node's stored config against the executor's declared
    /// schema. Fails with `UnknownExecutorType` when nothing is registered
    /// for the type, or `ConfigValidation` carrying every violation.
    pub fn validate_config(
        &self,
        node_id: &str,
        node_type: &str,
        config: &Value,
    ) -> Result<(), EngineError> {
        let executor = self
            .get(node_type)
            .ok_or_else(|| EngineError::UnknownExecutorType(node_type.to_string()))?;

        let violations = executor.config_schema().validate(config);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(EngineError::ConfigValidation {
                node_id: node_id.to_string(),
                violations,
            })
        }
    }

    /// Descriptors for every registered executor, health included.
    pub async fn describe_all(&self) -> Vec<ExecutorDescriptor> {
        let executors = self.executors.load();
        let mut descriptors = Vec::with_capacity(executors.len());

        for executor in executors.values() {
            descriptors.push(ExecutorDescriptor {
                node_type: executor.node_type().to_string(),
                config_schema: executor.config_schema(),
                capabilities: executor.capabilities(),
                healthy: executor.health_check().await,
            });
        }

        descriptors.sort_by(|a, b| a.node_type.cmp(&b.node_type));
        descriptors
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
