/// Workflow run engine
///
/// Executes one queue item's node sequence: resolve the definition, start
/// at the entry node, validate each node's config before dispatching it,
/// merge outputs into the run context and follow next/true/false
/// references until a terminal node. Cancellation is observed between node
/// executions, which are the safe checkpoints of a run.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::error::EngineError;
use crate::runtime::context::RunContext;
use crate::runtime::registry::ExecutorRegistry;
use crate::workflow::registry::DefinitionRegistry;
use crate::workflow::schema::{ConfigSchema, PropertySpec};
use crate::workflow::types::NodeRole;

/// How a run ended. The processor maps this onto the queue state machine.
#[derive(Debug)]
pub enum RunOutcome {
    Completed,
    /// The run observed a cancellation request at a checkpoint and stopped.
    Cancelled,
    Failed(EngineError),
}

/// Result of one run attempt. The context is always returned, even on
/// failure, so side effects of earlier nodes stay recorded for audit.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub context: RunContext,
    /// Node ids executed (or evaluated, for conditions), in order.
    pub executed_nodes: Vec<String>,
}

impl RunReport {
    fn failed(error: EngineError, context: RunContext, executed_nodes: Vec<String>) -> Self {
        Self {
            outcome: RunOutcome::Failed(error),
            context,
            executed_nodes,
        }
    }
}

/// Cancellation probe polled between node executions. The processor backs
/// this with the queue store's cancel flag; tests use `NeverCancelled`.
#[async_trait]
pub trait CancelProbe: Send + Sync {
    async fn is_cancelled(&self) -> bool;
}

/// Probe that never cancels; for manual runs and tests.
pub struct NeverCancelled;

#[async_trait]
impl CancelProbe for NeverCancelled {
    async fn is_cancelled(&self) -> bool {
        false
    }
}

/// The run engine. Stateless apart from its registry handles; one instance
/// serves every worker.
pub struct RunEngine {
    definitions: Arc<DefinitionRegistry>,
    executors: Arc<ExecutorRegistry>,
}

impl RunEngine {
    pub fn new(definitions: Arc<DefinitionRegistry>, executors: Arc<ExecutorRegistry>) -> Self {
        Self {
            definitions,
            executors,
        }
    }

    /// Execute one run to completion, failure or cancellation.
    pub async fn execute_run(
        &self,
        workflow_id: &str,
        trigger_data: Value,
        prior_context: Option<&Value>,
        cancel: &dyn CancelProbe,
    ) -> RunReport {
        let mut context = match prior_context {
            Some(snapshot) => RunContext::from_snapshot(snapshot, trigger_data),
            None => RunContext::from_trigger(trigger_data),
        };
        let mut executed: Vec<String> = Vec::new();

        let Some(compiled) = self.definitions.get(workflow_id) else {
            return RunReport::failed(
                EngineError::UnknownWorkflow(workflow_id.to_string()),
                context,
                executed,
            );
        };
        let definition = &compiled.definition;

        tracing::info!(
            "🚀 Starting run of workflow '{}' ({} nodes)",
            workflow_id,
            definition.nodes.len()
        );

        let mut current = Some(compiled.entry_node_id.clone());
        // The reference graph is validated acyclic at save time; this guard
        // only protects against definitions that bypassed validation.
        let mut remaining_steps = definition.nodes.len();

        while let Some(node_id) = current {
            if remaining_steps == 0 {
                return RunReport::failed(
                    EngineError::ExecutorFailure {
                        node_id: node_id.clone(),
                        retryable: false,
                        message: "node chain exceeded the definition's node count".to_string(),
                    },
                    context,
                    executed,
                );
            }
            remaining_steps -= 1;

            if cancel.is_cancelled().await {
                tracing::info!(
                    "⏹️ Run of workflow '{}' observed cancellation before node '{}'",
                    workflow_id,
                    node_id
                );
                return RunReport {
                    outcome: RunOutcome::Cancelled,
                    context,
                    executed_nodes: executed,
                };
            }

            let Some(node) = definition.node(&node_id) else {
                return RunReport::failed(
                    EngineError::UnknownNode {
                        workflow_id: workflow_id.to_string(),
                        node_id,
                    },
                    context,
                    executed,
                );
            };

            match node.role() {
                NodeRole::Trigger => {
                    // Entry points carry no behaviour of their own.
                    current = node.next_node_id.clone();
                }
                NodeRole::Condition => {
                    let violations = condition_schema().validate(&node.config);
                    if !violations.is_empty() {
                        return RunReport::failed(
                            EngineError::ConfigValidation {
                                node_id: node.id.clone(),
                                violations,
                            },
                            context,
                            executed,
                        );
                    }

                    let result = evaluate_condition(&context, &node.config);
                    tracing::debug!(
                        "🔀 Condition node '{}' evaluated {}",
                        node.id,
                        result
                    );

                    context.merge_node_output(
                        &node.id,
                        serde_json::json!({ "condition_result": result }),
                    );
                    executed.push(node.id.clone());

                    current = if result {
                        node.true_node_id.clone()
                    } else {
                        node.false_node_id.clone()
                    };
                }
                NodeRole::Action => {
                    if let Err(e) =
                        self.executors
                            .validate_config(&node.id, &node.node_type, &node.config)
                    {
                        return RunReport::failed(e, context, executed);
                    }

                    // validate_config already proved the type is registered.
                    let Some(executor) = self.executors.get(&node.node_type) else {
                        return RunReport::failed(
                            EngineError::UnknownExecutorType(node.node_type.clone()),
                            context,
                            executed,
                        );
                    };

                    let started = std::time::Instant::now();
                    match executor.execute(&node.config, &context).await {
                        Ok(output) => {
                            tracing::info!(
                                "✅ Node '{}' ({}) completed in {:?}",
                                node.id,
                                node.node_type,
                                started.elapsed()
                            );
                            context.merge_node_output(&node.id, output);
                            executed.push(node.id.clone());
                            current = node.next_node_id.clone();
                        }
                        Err(e) => {
                            tracing::warn!(
                                "❌ Node '{}' ({}) failed after {:?}: {}",
                                node.id,
                                node.node_type,
                                started.elapsed(),
                                e
                            );
                            return RunReport::failed(
                                EngineError::ExecutorFailure {
                                    node_id: node.id.clone(),
                                    retryable: e.is_retryable(),
                                    message: e.message().to_string(),
                                },
                                context,
                                executed,
                            );
                        }
                    }
                }
            }
        }

        tracing::info!(
            "🎉 Run of workflow '{}' completed ({} nodes executed)",
            workflow_id,
            executed.len()
        );

        RunReport {
            outcome: RunOutcome::Completed,
            context,
            executed_nodes: executed,
        }
    }
}

/// Schema for condition node configs. Conditions are engine-owned, so the
/// schema lives here rather than in the executor registry.
fn condition_schema() -> ConfigSchema {
    ConfigSchema::new()
        .property("field", PropertySpec::string().required().min_length(1))
        .property(
            "operator",
            PropertySpec::string().required().options([
                "equals",
                "not_equals",
                "greater_than",
                "less_than",
                "contains",
            ]),
        )
        .property("value", PropertySpec::string().required())
}

/// Deterministic, side-effect-free branch selection: look the field up in
/// the context and compare against the configured value. String-typed
/// config values are compared loosely (numeric when both sides parse as
/// numbers), matching how the surrounding product's forms capture them.
fn evaluate_condition(context: &RunContext, config: &Value) -> bool {
    let (Some(field), Some(operator), Some(expected)) = (
        config.get("field").and_then(|f| f.as_str()),
        config.get("operator").and_then(|o| o.as_str()),
        config.get("value").and_then(|v| v.as_str()),
    ) else {
        return false;
    };

    let actual = context.lookup(field);

    match operator {
        "equals" => loosely_equal(actual, expected),
        "not_equals" => !loosely_equal(actual, expected),
        "greater_than" => compare_numeric(actual, expected).map_or(false, |ord| ord.is_gt()),
        "less_than" => compare_numeric(actual, expected).map_or(false, |ord| ord.is_lt()),
        "contains" => match actual {
            Some(Value::String(s)) => s.contains(expected),
            Some(Value::Array(items)) => items.iter().any(|i| loosely_equal(Some(i), expected)),
            _ => false,
        },
        _ => false,
    }
}

fn loosely_equal(actual: Option<&Value>, expected: &str) -> bool {
    match actual {
        Some(Value::String(s)) => s == expected,
        Some(Value::Number(n)) => expected
            .parse::<f64>()
            .map_or(false, |e| n.as_f64() == Some(e)),
        Some(Value::Bool(b)) => expected.parse::<bool>().map_or(false, |e| *b == e),
        _ => false,
    }
}

fn compare_numeric(actual: Option<&Value>, expected: &str) -> Option<std::cmp::Ordering> {
    let actual = match actual {
        Some(Value::Number(n)) => n.as_f64()?,
        Some(Value::String(s)) => s.parse::<f64>().ok()?,
        _ => return None,
    };
    let expected = expected.parse::<f64>().ok()?;
    actual.partial_cmp(&expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equals_compares_strings_and_numbers_loosely() {
        let mut ctx = RunContext::from_trigger(json!({ "plan": "pro", "seats": 5 }));
        ctx.merge_node_output("score", json!({ "value": 72.5 }));

        let eq = |field: &str, value: &str| {
            evaluate_condition(
                &ctx,
                &json!({ "field": field, "operator": "equals", "value": value }),
            )
        };

        assert!(eq("trigger.plan", "pro"));
        assert!(!eq("trigger.plan", "free"));
        assert!(eq("trigger.seats", "5"));
        assert!(eq("score.value", "72.5"));
    }

    #[test]
    fn ordering_operators_require_numbers() {
        let ctx = RunContext::from_trigger(json!({ "score": 80, "tier": "gold" }));

        assert!(evaluate_condition(
            &ctx,
            &json!({ "field": "trigger.score", "operator": "greater_than", "value": "70" })
        ));
        assert!(!evaluate_condition(
            &ctx,
            &json!({ "field": "trigger.score", "operator": "less_than", "value": "70" })
        ));
        // Non-numeric values never satisfy an ordering operator.
        assert!(!evaluate_condition(
            &ctx,
            &json!({ "field": "trigger.tier", "operator": "greater_than", "value": "70" })
        ));
    }

    #[test]
    fn contains_handles_strings_and_arrays() {
        let ctx = RunContext::from_trigger(json!({
            "tags": ["vip", "newsletter"],
            "note": "needs onboarding call",
        }));

        assert!(evaluate_condition(
            &ctx,
            &json!({ "field": "trigger.tags", "operator": "contains", "value": "vip" })
        ));
        assert!(evaluate_condition(
            &ctx,
            &json!({ "field": "trigger.note", "operator": "contains", "value": "onboarding" })
        ));
        assert!(!evaluate_condition(
            &ctx,
            &json!({ "field": "trigger.tags", "operator": "contains", "value": "churned" })
        ));
    }

    #[test]
    fn missing_fields_evaluate_false_deterministically() {
        let ctx = RunContext::from_trigger(json!({}));
        for _ in 0..3 {
            assert!(!evaluate_condition(
                &ctx,
                &json!({ "field": "trigger.ghost", "operator": "equals", "value": "x" })
            ));
        }
    }

    #[test]
    fn condition_schema_rejects_unknown_operator() {
        let violations = condition_schema().validate(&json!({
            "field": "trigger.x",
            "operator": "resembles",
            "value": "y",
        }));
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("operator"));
    }
}
