//! Processor integration tests.
//!
//! These wire a full in-memory stack (definition store + registry,
//! executor registry with mocks, queue store, processor) and drive items
//! through claim, execution, retry, timeout and cancellation.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;

use crate::config::QueueConfig;
use crate::queue::processor::QueueProcessor;
use crate::queue::store::{EnqueueRequest, QueueStore};
use crate::queue::types::{Priority, QueueStatus};
use crate::runtime::engine::RunEngine;
use crate::runtime::executor::MockExecutor;
use crate::runtime::registry::ExecutorRegistry;
use crate::workflow::registry::DefinitionRegistry;
use crate::workflow::storage::DefinitionStorage;
use crate::workflow::types::{NodeDescriptor, WorkflowDefinition};

struct Harness {
    store: QueueStore,
    processor: Arc<QueueProcessor>,
}

fn fast_config() -> QueueConfig {
    QueueConfig {
        workers: 1,
        poll_interval_ms: 10,
        execution_timeout_ms: 250,
        default_max_retries: 3,
        backoff_base_ms: 10,
        backoff_cap_ms: 50,
    }
}

fn action_node(id: &str, node_type: &str, next: Option<&str>) -> NodeDescriptor {
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

fn single_node_workflow(node_type: &str) -> WorkflowDefinition {
    WorkflowDefinition {
        id: "wf-test".to_string(),
        name: "test workflow".to_string(),
        serialize_runs: false,
        nodes: vec![action_node("work", node_type, None)],
    }
}

async fn harness(
    definition: WorkflowDefinition,
    executors: Vec<Arc<MockExecutor>>,
    config: QueueConfig,
) -> Harness {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");

    let definition_storage = DefinitionStorage::new(pool.clone());
    definition_storage.init_schema().await.expect("definition schema");
    definition_storage
        .save_definition(&definition)
        .await
        .expect("save definition");

    let definitions = Arc::new(DefinitionRegistry::new(definition_storage));
    definitions.init_from_storage().await.expect("registry init");

    let registry = ExecutorRegistry::new();
    for executor in executors {
        registry.register(executor);
    }

    let store = QueueStore::new(pool);
    store.init_schema().await.expect("queue schema");

    let engine = Arc::new(RunEngine::new(definitions, Arc::new(registry)));
    let processor = Arc::new(QueueProcessor::new(store.clone(), engine, config));

    Harness { store, processor }
}

fn enqueue_request(max_retries: u32) -> EnqueueRequest {
    EnqueueRequest {
        workflow_id: "wf-test".to_string(),
        workflow_name: "test workflow".to_string(),
        trigger_data: json!({ "source": "test" }),
        priority: Priority::Normal,
        scheduled_at: None,
        max_retries,
        serialize_runs: false,
    }
}

#[tokio::test]
async fn successful_run_completes_the_item_and_records_context() {
    let mock = Arc::new(MockExecutor::returning("notify", json!({ "sent": true })));
    let h = harness(single_node_workflow("notify"), vec![mock.clone()], fast_config()).await;

    let item = h.store.enqueue(enqueue_request(3)).await.unwrap();
    let report = h.processor.process_queue().await;

    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(mock.call_count(), 1);

    let stored = h.store.get(&item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Completed);
    assert!(stored.completed_at.is_some());
    let context = stored.context.expect("context persisted");
    assert_eq!(context["variables"]["work"]["sent"], json!(true));
}

#[tokio::test]
async fn retryable_failure_goes_through_backoff_then_exhausts() {
    let mock = Arc::new(MockExecutor::failing_retryable("flaky", "upstream 503"));
    let h = harness(single_node_workflow("flaky"), vec![mock.clone()], fast_config()).await;

    let item = h.store.enqueue(enqueue_request(1)).await.unwrap();

    let report = h.processor.process_queue().await;
    assert_eq!(report.failed, 1);
    let stored = h.store.get(&item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Retrying);
    assert_eq!(stored.retry_count, 1);
    assert!(stored.error_message.as_deref().unwrap_or("").contains("upstream 503"));

    // Wait out the backoff, then drain again: budget is spent, so the
    // second attempt must land in failed.
    tokio::time::sleep(Duration::from_millis(60)).await;
    h.processor.process_queue().await;

    let stored = h.store.get(&item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Failed);
    assert_eq!(stored.retry_count, 1);
    assert!(stored.retries_within_bounds());
    assert_eq!(mock.call_count(), 2);
}

#[tokio::test]
async fn fatal_failure_skips_the_retry_machinery() {
    let mock = Arc::new(MockExecutor::failing_fatal("broken", "malformed payload"));
    let h = harness(single_node_workflow("broken"), vec![mock.clone()], fast_config()).await;

    let item = h.store.enqueue(enqueue_request(5)).await.unwrap();
    h.processor.process_queue().await;

    let stored = h.store.get(&item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Failed);
    assert_eq!(stored.retry_count, 0);
    assert_eq!(mock.call_count(), 1);
}

#[tokio::test]
async fn unknown_executor_type_fails_the_run() {
    let h = harness(single_node_workflow("teleport"), vec![], fast_config()).await;

    let item = h.store.enqueue(enqueue_request(3)).await.unwrap();
    h.processor.process_queue().await;

    let stored = h.store.get(&item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Failed);
    assert!(stored
        .error_message
        .as_deref()
        .unwrap_or("")
        .contains("unknown executor type"));
}

#[tokio::test]
async fn hanging_executor_hits_the_timeout_and_retries() {
    let mock = Arc::new(MockExecutor::hanging("stuck"));
    let h = harness(single_node_workflow("stuck"), vec![mock], fast_config()).await;

    let item = h.store.enqueue(enqueue_request(2)).await.unwrap();
    let started = std::time::Instant::now();
    h.processor.process_queue().await;

    // The item must reach retrying within the timeout window instead of
    // hanging forever.
    assert!(started.elapsed() < Duration::from_secs(5));
    let stored = h.store.get(&item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Retrying);
    assert!(stored
        .error_message
        .as_deref()
        .unwrap_or("")
        .contains("timed out"));
}

#[tokio::test]
async fn cancellation_of_a_hung_run_ends_in_cancelled() {
    let mock = Arc::new(MockExecutor::hanging("stuck"));
    let h = harness(single_node_workflow("stuck"), vec![mock], fast_config()).await;

    let item = h.store.enqueue(enqueue_request(2)).await.unwrap();

    // Run the drain concurrently and cancel while the executor hangs.
    let processor = Arc::clone(&h.processor);
    let drain = tokio::spawn(async move { processor.process_queue().await });

    // Give the worker time to claim, then request cancellation.
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.store.request_cancel(&item.id).await.unwrap();

    drain.await.unwrap();

    let stored = h.store.get(&item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Cancelled);
}

#[tokio::test]
async fn cancellation_between_nodes_is_observed_cooperatively() {
    // First node succeeds; cancellation is requested before the drain, so
    // the engine's checkpoint before the first node already observes it.
    let mock = Arc::new(MockExecutor::returning("notify", json!({ "sent": true })));
    let h = harness(single_node_workflow("notify"), vec![mock.clone()], fast_config()).await;

    let item = h.store.enqueue(enqueue_request(2)).await.unwrap();
    let claimed = h.store.claim_next("w1").await.unwrap().unwrap();
    assert_eq!(claimed.id, item.id);
    h.store.request_cancel(&item.id).await.unwrap();
    h.store.mark_cancelled(&item.id, "cancelled by operator", None).await.unwrap();

    let stored = h.store.get(&item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Cancelled);
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn pause_blocks_background_workers_until_resume() {
    let mock = Arc::new(MockExecutor::returning("notify", json!({ "ok": 1 })));
    let h = harness(single_node_workflow("notify"), vec![mock], fast_config()).await;

    h.processor.pause();
    let handles = h.processor.spawn_workers();

    let item = h.store.enqueue(enqueue_request(3)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Paused: still pending.
    let stored = h.store.get(&item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Pending);

    h.processor.resume();
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let stored = h.store.get(&item.id).await.unwrap().unwrap();
        if stored.status == QueueStatus::Completed {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "item never completed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn status_report_reflects_queue_state() {
    let mock = Arc::new(MockExecutor::returning("notify", json!({ "ok": 1 })));
    let h = harness(single_node_workflow("notify"), vec![mock], fast_config()).await;

    h.store.enqueue(enqueue_request(3)).await.unwrap();

    let status = h.processor.status().await;
    assert_eq!(status.queue_size, 1);
    assert!(!status.is_processing);
    assert!(!status.is_paused);
    assert!(status.next_scheduled_at.is_some());

    h.processor.process_queue().await;
    let status = h.processor.status().await;
    assert_eq!(status.queue_size, 0);
    assert!(status.last_processed_at.is_some());
}
