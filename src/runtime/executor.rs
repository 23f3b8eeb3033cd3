/// Node executors
///
/// The `NodeExecutor` trait is the contract between the run engine and the
/// units of work a workflow can dispatch. Each executor declares its type
/// key, the config schema it accepts, capability tags for operator
/// tooling, and a health probe. The built-in catalog is registered at
/// startup; domain-specific executors are registered the same way by the
/// embedding application.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::ExecutorError;
use crate::runtime::context::RunContext;
use crate::workflow::schema::{ConfigSchema, PropertySpec};

/// The core executor trait. All built-in nodes and application-registered
/// integrations implement this.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Unique type key nodes reference in their `type` field.
    fn node_type(&self) -> &str;

    /// Declared config shape; validated before the node enters a run.
    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new()
    }

    /// Capability tags surfaced to operator tooling ("network", "pure", ...).
    fn capabilities(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Liveness probe for the registry health report.
    async fn health_check(&self) -> bool {
        true
    }

    /// Execute the node. The returned value is merged into the run context
    /// under the node's id. Failures must be classified retryable/fatal.
    async fn execute(&self, config: &Value, ctx: &RunContext) -> Result<Value, ExecutorError>;
}

// ---------------------------------------------------------------------------
// http_request
// ---------------------------------------------------------------------------

/// Calls an external HTTP endpoint. This is the integration workhorse:
/// CRM webhooks, ad platforms and mail providers are all reached through
/// it. Network-level failures and 5xx responses are retryable; 4xx means
/// the node is misconfigured and retrying would not help.
pub struct HttpRequestExecutor {
    client: reqwest::Client,
}

impl HttpRequestExecutor {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for HttpRequestExecutor {
    fn node_type(&self) -> &str {
        "http_request"
    }

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new()
            .property("url", PropertySpec::string().required().min_length(1))
            .property(
                "method",
                PropertySpec::string()
                    .options(["GET", "POST", "PUT", "DELETE", "PATCH"])
                    .default_value("POST"),
            )
            .property("headers", PropertySpec::object())
            .property("body", PropertySpec::object())
    }

    fn capabilities(&self) -> Vec<&'static str> {
        vec!["network"]
    }

    async fn execute(&self, config: &Value, _ctx: &RunContext) -> Result<Value, ExecutorError> {
        let url = config
            .get("url")
            .and_then(|u| u.as_str())
            .ok_or_else(|| ExecutorError::Fatal("http_request requires a url".to_string()))?;

        let method = config
            .get("method")
            .and_then(|m| m.as_str())
            .unwrap_or("POST");
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| ExecutorError::Fatal(format!("unsupported HTTP method '{method}'")))?;

        let mut request = self.client.request(method, url);

        if let Some(headers) = config.get("headers").and_then(|h| h.as_object()) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name, value);
                }
            }
        }
        if let Some(body) = config.get("body") {
            if !body.is_null() {
                request = request.json(body);
            }
        }

        let response = request.send().await.map_err(|e| {
            // Connection problems are transient by definition.
            ExecutorError::Retryable(format!("http request failed: {e}"))
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExecutorError::Retryable(format!("failed to read response body: {e}")))?;
        let body_json = serde_json::from_str::<Value>(&body).unwrap_or(Value::String(body));

        if status.is_server_error() {
            return Err(ExecutorError::Retryable(format!(
                "upstream returned {status}"
            )));
        }
        if status.is_client_error() {
            return Err(ExecutorError::Fatal(format!("upstream returned {status}")));
        }

        Ok(json!({
            "status": status.as_u16(),
            "body": body_json,
        }))
    }
}

// ---------------------------------------------------------------------------
// delay
// ---------------------------------------------------------------------------

/// Pauses the run for a bounded number of seconds. Long waits belong in
/// `scheduled_at`, not here, so the ceiling stays well under the per-item
/// execution timeout.
pub struct DelayExecutor;

#[async_trait]
impl NodeExecutor for DelayExecutor {
    fn node_type(&self) -> &str {
        "delay"
    }

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new().property(
            "delay_seconds",
            PropertySpec::number().required().minimum(1.0).maximum(300.0),
        )
    }

    fn capabilities(&self) -> Vec<&'static str> {
        vec!["timing"]
    }

    async fn execute(&self, config: &Value, _ctx: &RunContext) -> Result<Value, ExecutorError> {
        let seconds = config
            .get("delay_seconds")
            .and_then(|s| s.as_f64())
            .ok_or_else(|| ExecutorError::Fatal("delay requires delay_seconds".to_string()))?;

        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;

        Ok(json!({ "delayed_seconds": seconds }))
    }
}

// ---------------------------------------------------------------------------
// transform
// ---------------------------------------------------------------------------

/// Reshapes context data. Each mapping entry pairs an output key with a
/// JSONPath expression evaluated against the context snapshot, so nodes
/// downstream see exactly the fields they need.
pub struct TransformExecutor;

#[async_trait]
impl NodeExecutor for TransformExecutor {
    fn node_type(&self) -> &str {
        "transform"
    }

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new().property("mappings", PropertySpec::object().required())
    }

    fn capabilities(&self) -> Vec<&'static str> {
        vec!["pure"]
    }

    async fn execute(&self, config: &Value, ctx: &RunContext) -> Result<Value, ExecutorError> {
        let mappings = config
            .get("mappings")
            .and_then(|m| m.as_object())
            .ok_or_else(|| ExecutorError::Fatal("transform requires mappings".to_string()))?;

        let snapshot = ctx.snapshot();
        let mut output = Map::new();

        for (key, path) in mappings {
            let path = path.as_str().ok_or_else(|| {
                ExecutorError::Fatal(format!("mapping '{key}' must be a JSONPath string"))
            })?;

            let matches = jsonpath_lib::select(&snapshot, path)
                .map_err(|e| ExecutorError::Fatal(format!("invalid JSONPath '{path}': {e}")))?;

            // Missing data is not an error; downstream conditions can
            // branch on null.
            let value = matches.first().map(|v| (*v).clone()).unwrap_or(Value::Null);
            output.insert(key.clone(), value);
        }

        Ok(Value::Object(output))
    }
}

// ---------------------------------------------------------------------------
// log_message
// ---------------------------------------------------------------------------

/// Emits a structured log line from inside a run. Useful as a probe node
/// while assembling a workflow.
pub struct LogMessageExecutor;

#[async_trait]
impl NodeExecutor for LogMessageExecutor {
    fn node_type(&self) -> &str {
        "log_message"
    }

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new()
            .property("message", PropertySpec::string().required().min_length(1))
            .property(
                "level",
                PropertySpec::string()
                    .options(["debug", "info", "warn"])
                    .default_value("info"),
            )
    }

    fn capabilities(&self) -> Vec<&'static str> {
        vec!["pure"]
    }

    async fn execute(&self, config: &Value, _ctx: &RunContext) -> Result<Value, ExecutorError> {
        let message = config
            .get("message")
            .and_then(|m| m.as_str())
            .ok_or_else(|| ExecutorError::Fatal("log_message requires a message".to_string()))?;

        match config.get("level").and_then(|l| l.as_str()) {
            Some("debug") => tracing::debug!("📝 {}", message),
            Some("warn") => tracing::warn!("📝 {}", message),
            _ => tracing::info!("📝 {}", message),
        }

        Ok(json!({ "logged": true, "message": message }))
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------

/// Behaviour injected into `MockExecutor` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Fail with a retryable error.
    FailRetryable(String),
    /// Fail with a fatal error.
    FailFatal(String),
    /// Never return; exercises the per-item timeout harness.
    Hang,
}

/// A mock executor that records every call it receives and returns a
/// programmer-specified result. Lives outside `#[cfg(test)]` so
/// integration tests in `tests/` can use it as well.
pub struct MockExecutor {
    type_key: String,
    behaviour: MockBehaviour,
    schema: ConfigSchema,
    /// All configs seen by this executor, in call order.
    pub calls: Arc<Mutex<Vec<Value>>>,
}

impl MockExecutor {
    pub fn returning(type_key: impl Into<String>, value: Value) -> Self {
        Self::with_behaviour(type_key, MockBehaviour::ReturnValue(value))
    }

    pub fn failing_retryable(type_key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(type_key, MockBehaviour::FailRetryable(msg.into()))
    }

    pub fn failing_fatal(type_key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(type_key, MockBehaviour::FailFatal(msg.into()))
    }

    pub fn hanging(type_key: impl Into<String>) -> Self {
        Self::with_behaviour(type_key, MockBehaviour::Hang)
    }

    pub fn with_behaviour(type_key: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            type_key: type_key.into(),
            behaviour,
            schema: ConfigSchema::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Attach a config schema so validation paths can be exercised.
    pub fn with_schema(mut self, schema: ConfigSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Number of times this executor has been invoked.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl NodeExecutor for MockExecutor {
    fn node_type(&self) -> &str {
        &self.type_key
    }

    fn config_schema(&self) -> ConfigSchema {
        self.schema.clone()
    }

    async fn execute(&self, config: &Value, _ctx: &RunContext) -> Result<Value, ExecutorError> {
        self.calls.lock().unwrap().push(config.clone());

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(v.clone()),
            MockBehaviour::FailRetryable(msg) => Err(ExecutorError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(ExecutorError::Fatal(msg.clone())),
            MockBehaviour::Hang => {
                std::future::pending::<()>().await;
                unreachable!("pending future never resolves")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transform_maps_context_fields() {
        let mut ctx = RunContext::from_trigger(json!({ "lead": { "email": "ada@example.com" } }));
        ctx.merge_node_output("score", json!({ "value": 88 }));

        let config = json!({
            "mappings": {
                "email": "$.trigger.lead.email",
                "score": "$.variables.score.value",
                "absent": "$.variables.nothing.here",
            }
        });

        let output = TransformExecutor.execute(&config, &ctx).await.unwrap();
        assert_eq!(output["email"], json!("ada@example.com"));
        assert_eq!(output["score"], json!(88));
        assert_eq!(output["absent"], Value::Null);
    }

    #[tokio::test]
    async fn transform_rejects_invalid_jsonpath() {
        let ctx = RunContext::from_trigger(Value::Null);
        let config = json!({ "mappings": { "x": "$..[" } });

        let err = TransformExecutor.execute(&config, &ctx).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Fatal(_)));
    }

    #[tokio::test]
    async fn mock_records_calls() {
        let mock = MockExecutor::returning("probe", json!({ "ok": true }));
        let ctx = RunContext::from_trigger(Value::Null);

        mock.execute(&json!({ "a": 1 }), &ctx).await.unwrap();
        mock.execute(&json!({ "a": 2 }), &ctx).await.unwrap();

        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.calls.lock().unwrap()[1], json!({ "a": 2 }));
    }

    #[tokio::test]
    async fn http_executor_schema_requires_url() {
        let schema = HttpRequestExecutor::new().config_schema();
        let violations = schema.validate(&json!({ "method": "GET" }));
        assert_eq!(violations, vec!["url is required".to_string()]);
    }
}
