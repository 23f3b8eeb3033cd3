/// Per-run execution context
///
/// The variable bag threaded through one queue item's node sequence. Each
/// executed node's output is merged under the node's own id, so later
/// nodes can reference earlier outputs without key collisions; writing the
/// same namespace again shadows the previous value. The bag is persisted
/// as a snapshot on every status write and kept for audit once the run
/// reaches a terminal state.

use serde_json::{json, Map, Value};

/// Execution context for a single queue item run.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Opaque payload from the triggering adapter, readable by every node
    /// under the `trigger` root.
    pub trigger: Value,
    /// Node outputs, keyed by node id.
    pub variables: Map<String, Value>,
}

impl RunContext {
    /// Fresh context for a newly claimed item.
    pub fn from_trigger(trigger_data: Value) -> Self {
        Self {
            trigger: trigger_data,
            variables: Map::new(),
        }
    }

    /// Rebuild a context from a persisted snapshot; used when a retried
    /// item carries audit state from an earlier attempt.
    pub fn from_snapshot(snapshot: &Value, trigger_data: Value) -> Self {
        let variables = snapshot
            .get("variables")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();
        let trigger = snapshot
            .get("trigger")
            .cloned()
            .unwrap_or(trigger_data);

        Self { trigger, variables }
    }

    /// Merge a node's output under the node's id. Later writes to the same
    /// node id shadow earlier ones; nothing is ever destructively merged
    /// across namespaces.
    pub fn merge_node_output(&mut self, node_id: &str, output: Value) {
        self.variables.insert(node_id.to_string(), output);
    }

    /// Resolve a dotted path against the context. The first segment is
    /// either the literal `trigger` or a node id; the rest walks object
    /// keys. Condition nodes use this for their field lookups.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let root = segments.next()?;

        let mut current = if root == "trigger" {
            &self.trigger
        } else {
            self.variables.get(root)?
        };

        for segment in segments {
            current = current.get(segment)?;
        }

        Some(current)
    }

    /// Serializable snapshot persisted alongside the queue item.
    pub fn snapshot(&self) -> Value {
        json!({
            "trigger": self.trigger,
            "variables": Value::Object(self.variables.clone()),
        })
    }
}
