/// Hot-reload definition registry using ArcSwap
///
/// Lock-free reads of the active workflow definitions. Every write swaps
/// the whole map pointer, so queue workers resolving a definition
/// mid-claim never block on a registry update.

use crate::workflow::{storage::DefinitionStorage, types::WorkflowDefinition};
use anyhow::Result;
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

/// A definition compiled for execution: the raw graph plus the lookups the
/// run engine and trigger adapters need on every run.
#[derive(Debug, Clone)]
pub struct CompiledDefinition {
    pub definition: WorkflowDefinition,
    /// Entry node id a run starts from.
    pub entry_node_id: String,
    /// Paths declared by webhook trigger nodes, used by the webhook
    /// adapter to match incoming requests.
    pub webhook_paths: Vec<String>,
}

/// Lock-free registry of compiled workflow definitions.
#[derive(Debug)]
pub struct DefinitionRegistry {
    definitions: ArcSwap<HashMap<String, Arc<CompiledDefinition>>>,
    storage: DefinitionStorage,
}

impl DefinitionRegistry {
    pub fn new(storage: DefinitionStorage) -> Self {
        Self {
            definitions: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
        }
    }

    /// Populate the registry from storage during startup.
    pub async fn init_from_storage(&self) -> Result<()> {
        let stored = self.storage.load_all_definitions().await?;
        let mut compiled = HashMap::new();

        for (id, definition) in stored {
            match compile(definition) {
                Ok(c) => {
                    compiled.insert(id, Arc::new(c));
                }
                // A bad row must not keep the whole engine from booting.
                Err(problems) => {
                    tracing::warn!(
                        "⚠️ Skipping invalid stored workflow '{}': {}",
                        id,
                        problems.join("; ")
                    );
                }
            }
        }

        let count = compiled.len();
        self.definitions.store(Arc::new(compiled));
        tracing::info!("📊 Definition registry initialized with {} workflows", count);

        Ok(())
    }

    /// Hot-reload a single definition after a storage write.
    pub async fn reload_definition(&self, workflow_id: &str) -> Result<()> {
        let definition = self
            .storage
            .get_definition(workflow_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Workflow not found: {}", workflow_id))?;

        let compiled = compile(definition)
            .map_err(|problems| anyhow::anyhow!("Invalid workflow: {}", problems.join("; ")))?;

        let current = self.definitions.load();
        let mut next = (**current).clone();
        next.insert(workflow_id.to_string(), Arc::new(compiled));
        self.definitions.store(Arc::new(next));

        tracing::info!("🔥 Hot-reloaded workflow definition: {}", workflow_id);
        Ok(())
    }

    /// Lock-free definition lookup; cheap Arc clone.
    pub fn get(&self, workflow_id: &str) -> Option<Arc<CompiledDefinition>> {
        self.definitions.load().get(workflow_id).cloned()
    }

    pub fn list_ids(&self) -> Vec<String> {
        self.definitions.load().keys().cloned().collect()
    }

    pub fn all(&self) -> Vec<Arc<CompiledDefinition>> {
        self.definitions.load().values().cloned().collect()
    }

    pub fn remove(&self, workflow_id: &str) {
        let current = self.definitions.load();
        let mut next = (**current).clone();

        if next.remove(workflow_id).is_some() {
            self.definitions.store(Arc::new(next));
            tracing::info!("🗑️ Removed workflow definition from registry: {}", workflow_id);
        }
    }
}

/// Validate and compile a definition: reject structural problems, then
/// extract the entry node and webhook paths.
fn compile(definition: WorkflowDefinition) -> Result<CompiledDefinition, Vec<String>> {
    let problems = definition.validate();
    if !problems.is_empty() {
        return Err(problems);
    }

    // validate() guarantees at least one node, so entry_node() is Some.
    let entry_node_id = definition
        .entry_node()
        .map(|n| n.id.clone())
        .ok_or_else(|| vec!["workflow must contain at least one node".to_string()])?;

    let webhook_paths = definition
        .nodes
        .iter()
        .filter(|n| n.node_type == "webhook")
        .filter_map(|n| n.config.get("path").and_then(|p| p.as_str()))
        .map(str::to_string)
        .collect();

    Ok(CompiledDefinition {
        definition,
        entry_node_id,
        webhook_paths,
    })
}
