/// Workflow definition types
///
/// A definition is an immutable graph of typed node descriptors. Branching
/// is expressed on the nodes themselves: `next_node_id` for the linear
/// path, `true_node_id` / `false_node_id` for condition nodes. Definitions
/// are stored as JSON and validated with petgraph before they are accepted.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Structural role of a node, derived from its type string.
///
/// Trigger and condition handling is wired into the engine; everything
/// else is dispatched through the executor registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Entry point (webhook, schedule, manual). Never executed; the
    /// matching trigger adapter enqueues the run and the engine steps
    /// past it.
    Trigger,
    /// Branch selector; evaluates its config against the run context and
    /// picks the true/false successor. Side-effect free.
    Condition,
    /// Regular unit of work resolved via the executor registry.
    Action,
}

/// A single node in a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Unique node id within the definition.
    pub id: String,
    /// Human-readable label shown in the canvas.
    #[serde(default)]
    pub name: String,
    /// Executor type key ("send_email", "http_request", ...) or one of the
    /// structural kinds: "webhook", "schedule", "manual", "condition".
    #[serde(rename = "type")]
    pub node_type: String,
    /// Node-specific configuration, validated against the executor's
    /// declared schema before the node is admitted into a run.
    #[serde(default)]
    pub config: Value,
    /// Canvas position metadata; carried but never interpreted here.
    #[serde(default)]
    pub position_x: f64,
    #[serde(default)]
    pub position_y: f64,
    /// Successor for the linear path. `None` means terminal.
    #[serde(default)]
    pub next_node_id: Option<String>,
    /// Successor taken when a condition node evaluates true.
    #[serde(default)]
    pub true_node_id: Option<String>,
    /// Successor taken when a condition node evaluates false.
    #[serde(default)]
    pub false_node_id: Option<String>,
}

impl NodeDescriptor {
    pub fn role(&self) -> NodeRole {
        match self.node_type.as_str() {
            "webhook" | "schedule" | "manual" => NodeRole::Trigger,
            "condition" | "if_else" => NodeRole::Condition,
            _ => NodeRole::Action,
        }
    }

    /// All outgoing references, regardless of role.
    fn successors(&self) -> impl Iterator<Item = &String> {
        self.next_node_id
            .iter()
            .chain(self.true_node_id.iter())
            .chain(self.false_node_id.iter())
    }
}

/// An immutable workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    /// When set, runs of this workflow never overlap: the queue refuses to
    /// claim a second item while one is processing.
    #[serde(default)]
    pub serialize_runs: bool,
    pub nodes: Vec<NodeDescriptor>,
}

impl WorkflowDefinition {
    pub fn node(&self, id: &str) -> Option<&NodeDescriptor> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The node a run starts from: the first trigger node, or the first
    /// node when the definition has no explicit trigger (manual-only
    /// workflows created through the API).
    pub fn entry_node(&self) -> Option<&NodeDescriptor> {
        self.nodes
            .iter()
            .find(|n| n.role() == NodeRole::Trigger)
            .or_else(|| self.nodes.first())
    }

    /// Structural validation, collecting every problem found:
    /// non-empty id/name, at least one node, unique node ids, every
    /// next/true/false reference resolving inside the definition, and an
    /// acyclic reference graph (a cycle would make a run walk forever).
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.id.is_empty() {
            problems.push("workflow id must not be empty".to_string());
        }
        if self.name.is_empty() {
            problems.push("workflow name must not be empty".to_string());
        }
        if self.nodes.is_empty() {
            problems.push("workflow must contain at least one node".to_string());
            return problems;
        }

        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut index: HashMap<&str, NodeIndex> = HashMap::new();

        for node in &self.nodes {
            if node.id.is_empty() {
                problems.push("node id must not be empty".to_string());
                continue;
            }
            if index.contains_key(node.id.as_str()) {
                problems.push(format!("duplicate node id '{}'", node.id));
                continue;
            }
            let idx = graph.add_node(node.id.as_str());
            index.insert(node.id.as_str(), idx);
        }

        for node in &self.nodes {
            let Some(&from) = index.get(node.id.as_str()) else {
                continue;
            };
            for target in node.successors() {
                match index.get(target.as_str()) {
                    Some(&to) => {
                        graph.add_edge(from, to, ());
                    }
                    None => problems.push(format!(
                        "node '{}' references unknown node '{}'",
                        node.id, target
                    )),
                }
            }
        }

        if toposort(&graph, None).is_err() {
            problems.push("workflow references form a cycle".to_string());
        }

        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str, node_type: &str, next: Option<&str>) -> NodeDescriptor {
        NodeDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            node_type: node_type.to_string(),
            config: json!({}),
            position_x: 0.0,
            position_y: 0.0,
            next_node_id: next.map(str::to_string),
            true_node_id: None,
            false_node_id: None,
        }
    }

    fn definition(nodes: Vec<NodeDescriptor>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: "wf-1".to_string(),
            name: "lead nurture".to_string(),
            serialize_runs: false,
            nodes,
        }
    }

    #[test]
    fn linear_chain_validates() {
        let wf = definition(vec![
            node("start", "webhook", Some("step")),
            node("step", "send_email", None),
        ]);
        assert!(wf.validate().is_empty());
    }

    #[test]
    fn dangling_reference_is_reported() {
        let wf = definition(vec![node("start", "webhook", Some("missing"))]);
        let problems = wf.validate();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("missing"));
    }

    #[test]
    fn cycle_is_rejected() {
        let wf = definition(vec![
            node("a", "send_email", Some("b")),
            node("b", "send_email", Some("a")),
        ]);
        assert!(wf.validate().iter().any(|p| p.contains("cycle")));
    }

    #[test]
    fn duplicate_node_ids_are_rejected() {
        let wf = definition(vec![
            node("a", "webhook", None),
            node("a", "send_email", None),
        ]);
        assert!(wf.validate().iter().any(|p| p.contains("duplicate")));
    }

    #[test]
    fn branch_references_are_checked_too() {
        let mut cond = node("gate", "condition", None);
        cond.true_node_id = Some("yes".to_string());
        cond.false_node_id = Some("nope".to_string());
        let wf = definition(vec![cond, node("yes", "send_email", None)]);
        let problems = wf.validate();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("nope"));
    }

    #[test]
    fn entry_node_prefers_trigger() {
        let wf = definition(vec![
            node("work", "send_email", None),
            node("start", "manual", Some("work")),
        ]);
        assert_eq!(wf.entry_node().unwrap().id, "start");
    }

    #[test]
    fn roles_are_derived_from_type_strings() {
        assert_eq!(node("n", "webhook", None).role(), NodeRole::Trigger);
        assert_eq!(node("n", "schedule", None).role(), NodeRole::Trigger);
        assert_eq!(node("n", "condition", None).role(), NodeRole::Condition);
        assert_eq!(node("n", "send_email", None).role(), NodeRole::Action);
    }
}
