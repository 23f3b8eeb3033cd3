/// Engine and queue error taxonomy
///
/// Every failure the queue processor has to classify lives here. The split
/// that matters operationally is retryable vs. fatal: retryable errors send
/// an item back through the backoff machinery while retries remain,
/// everything else fails the run immediately.

use thiserror::Error;

use crate::queue::types::QueueStatus;

/// Errors produced by the workflow engine and execution queue.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A status change outside the queue state machine was attempted, or a
    /// concurrent writer got there first. Never ignored silently.
    #[error("invalid state transition for queue item {item_id}: {from} -> {to}")]
    InvalidStateTransition {
        item_id: String,
        from: QueueStatus,
        to: QueueStatus,
    },

    /// A node references an executor type nobody registered.
    #[error("unknown executor type '{0}'")]
    UnknownExecutorType(String),

    /// A node's stored config failed schema validation. All violations are
    /// collected up front so the run never starts with a half-valid node.
    #[error("config validation failed for node '{node_id}': {}", violations.join("; "))]
    ConfigValidation {
        node_id: String,
        violations: Vec<String>,
    },

    /// The executor itself failed; it decides whether the cause is transient.
    #[error("executor failure in node '{node_id}': {message}")]
    ExecutorFailure {
        node_id: String,
        retryable: bool,
        message: String,
    },

    /// The per-item execution timeout elapsed before the run finished.
    #[error("execution of queue item {item_id} timed out after {timeout_ms}ms")]
    ExecutionTimeout { item_id: String, timeout_ms: u64 },

    /// A cancelled run did not observe cancellation within the grace period.
    #[error("queue item {item_id} did not honour cancellation in time")]
    CancellationTimeout { item_id: String },

    /// The queue item references a workflow the definition store doesn't know.
    #[error("unknown workflow '{0}'")]
    UnknownWorkflow(String),

    /// A node reference points outside its own workflow definition.
    #[error("workflow '{workflow_id}' has no node '{node_id}'")]
    UnknownNode {
        workflow_id: String,
        node_id: String,
    },

    /// No queue item with the given id exists.
    #[error("unknown queue item '{0}'")]
    UnknownQueueItem(String),

    /// Operator retry of an item whose attempts are already exhausted.
    #[error("queue item {item_id} has exhausted its retry budget")]
    RetryBudgetExhausted { item_id: String },

    /// A single-item operation hit an item whose status forbids it.
    #[error("queue item {item_id} is not updatable in status {status}")]
    ItemNotUpdatable {
        item_id: String,
        status: QueueStatus,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether the retry machinery may re-enqueue an item that failed with
    /// this error. Timeouts are retryable; validation and lookup failures
    /// never are.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::ExecutorFailure { retryable, .. } => *retryable,
            EngineError::ExecutionTimeout { .. } => true,
            _ => false,
        }
    }
}

/// Errors returned by a node executor's `execute` method.
///
/// The processor uses the variant to decide retry behaviour:
/// - `Retryable`: transient cause, the item goes back through backoff.
/// - `Fatal`: permanent cause, the run is marked failed immediately.
#[derive(Debug, Error, Clone)]
pub enum ExecutorError {
    #[error("retryable executor error: {0}")]
    Retryable(String),

    #[error("fatal executor error: {0}")]
    Fatal(String),
}

impl ExecutorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecutorError::Retryable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            ExecutorError::Retryable(m) | ExecutorError::Fatal(m) => m,
        }
    }
}
