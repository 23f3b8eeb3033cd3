/// Queue processor
///
/// The active component of the engine. Workers repeatedly claim the next
/// eligible item, hand it to the run engine under a per-item timeout, and
/// translate the outcome back into a state-machine transition: success
/// completes the item, retryable failures go through exponential backoff
/// while budget remains, everything else fails the run. A hung or
/// panicking executor is cut loose without taking the worker down.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::config::QueueConfig;
use crate::error::EngineError;
use crate::queue::store::QueueStore;
use crate::queue::types::{QueueItem, QueueStatus};
use crate::runtime::engine::{CancelProbe, RunEngine, RunOutcome};

const RECENT_ERROR_CAP: usize = 20;

/// Result of a manual drain (`process_queue`).
#[derive(Debug, Default, Serialize)]
pub struct ProcessReport {
    /// Items that completed.
    pub processed: u64,
    /// Items that ended in failed or retrying.
    pub failed: u64,
    /// Items that left the queue without running (cancelled mid-drain).
    pub skipped: u64,
    pub errors: Vec<String>,
    pub processing_time_ms: u64,
}

/// Operator-facing queue status snapshot.
#[derive(Debug, Serialize)]
pub struct QueueStatusReport {
    pub is_processing: bool,
    pub is_paused: bool,
    pub current_processing: Vec<String>,
    pub queue_size: i64,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub next_scheduled_at: Option<DateTime<Utc>>,
    pub errors: Vec<String>,
}

/// Shared mutable processor state, visible to every worker and the API.
struct ProcessorState {
    paused: AtomicBool,
    processing: Mutex<HashSet<String>>,
    last_processed_at: Mutex<Option<DateTime<Utc>>>,
    recent_errors: Mutex<Vec<String>>,
}

/// Cancellation probe backed by the queue store's cancel flag.
struct StoreCancelProbe {
    store: QueueStore,
    item_id: String,
}

#[async_trait]
impl CancelProbe for StoreCancelProbe {
    async fn is_cancelled(&self) -> bool {
        self.store
            .cancellation_requested(&self.item_id)
            .await
            .unwrap_or(false)
    }
}

/// The queue processor. One instance serves all workers; clone the Arc.
pub struct QueueProcessor {
    store: QueueStore,
    engine: Arc<RunEngine>,
    config: QueueConfig,
    state: Arc<ProcessorState>,
}

impl QueueProcessor {
    pub fn new(store: QueueStore, engine: Arc<RunEngine>, config: QueueConfig) -> Self {
        Self {
            store,
            engine,
            config,
            state: Arc::new(ProcessorState {
                paused: AtomicBool::new(false),
                processing: Mutex::new(HashSet::new()),
                last_processed_at: Mutex::new(None),
                recent_errors: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Global processing toggle: paused workers keep polling but claim
    /// nothing until resumed.
    pub fn pause(&self) {
        self.state.paused.store(true, Ordering::SeqCst);
        tracing::info!("⏸️ Queue processing paused");
    }

    pub fn resume(&self) {
        self.state.paused.store(false, Ordering::SeqCst);
        tracing::info!("▶️ Queue processing resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused.load(Ordering::SeqCst)
    }

    /// Spawn the configured number of background workers.
    pub fn spawn_workers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.config.workers.max(1))
            .map(|i| {
                let processor = Arc::clone(self);
                let worker_id = format!("worker-{i}");
                tokio::spawn(async move {
                    tracing::info!("🚀 Queue worker {} started", worker_id);
                    processor.worker_loop(&worker_id).await;
                })
            })
            .collect()
    }

    async fn worker_loop(&self, worker_id: &str) {
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));

        loop {
            if self.is_paused() {
                tokio::time::sleep(poll).await;
                continue;
            }

            if let Err(e) = self.store.redeliver_due().await {
                self.record_error(format!("redelivery sweep failed: {e}"));
                tokio::time::sleep(poll).await;
                continue;
            }

            match self.process_next(worker_id).await {
                Ok(true) => {} // claimed and ran something; go straight back
                Ok(false) => tokio::time::sleep(poll).await,
                Err(e) => {
                    self.record_error(format!("{worker_id}: {e}"));
                    tokio::time::sleep(poll).await;
                }
            }
        }
    }

    /// Claim and run at most one item. Returns whether anything was claimed.
    async fn process_next(&self, worker_id: &str) -> Result<bool, EngineError> {
        let Some(item) = self.store.claim_next(worker_id).await? else {
            return Ok(false);
        };

        self.run_claimed(item).await?;
        Ok(true)
    }

    /// Drain currently-eligible items once. This is the manual/batch entry
    /// point behind the `process` operation; it runs even while the
    /// background workers are paused, because invoking it IS the operator
    /// override.
    pub async fn process_queue(&self) -> ProcessReport {
        let started = Instant::now();
        let mut report = ProcessReport::default();

        if let Err(e) = self.store.redeliver_due().await {
            report.errors.push(format!("redelivery sweep failed: {e}"));
        }

        loop {
            match self.store.claim_next("batch").await {
                Ok(Some(item)) => {
                    let item_id = item.id.clone();
                    match self.run_claimed(item).await {
                        Ok(QueueStatus::Completed) => report.processed += 1,
                        Ok(QueueStatus::Cancelled) => report.skipped += 1,
                        Ok(_) => report.failed += 1,
                        Err(e) => {
                            report.failed += 1;
                            report.errors.push(format!("{item_id}: {e}"));
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    report.errors.push(format!("claim failed: {e}"));
                    break;
                }
            }
        }

        report.processing_time_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            "📦 Queue drain finished: {} processed, {} failed, {} skipped in {}ms",
            report.processed,
            report.failed,
            report.skipped,
            report.processing_time_ms
        );
        report
    }

    /// Execute one claimed item and drive it to its next state. Returns
    /// the status the item ended up in.
    async fn run_claimed(&self, item: QueueItem) -> Result<QueueStatus, EngineError> {
        let item_id = item.id.clone();
        tracing::info!(
            "🏃 Processing item {} (workflow '{}', attempt {}/{})",
            item_id,
            item.workflow_id,
            item.retry_count + 1,
            item.max_retries + 1
        );
        self.state.processing.lock().unwrap().insert(item_id.clone());

        let status = self.execute_and_transition(&item).await;

        self.state.processing.lock().unwrap().remove(&item_id);
        *self.state.last_processed_at.lock().unwrap() = Some(Utc::now());

        if let Err(e) = &status {
            self.record_error(format!("{item_id}: {e}"));
        }
        status
    }

    async fn execute_and_transition(&self, item: &QueueItem) -> Result<QueueStatus, EngineError> {
        let engine = Arc::clone(&self.engine);
        let probe = StoreCancelProbe {
            store: self.store.clone(),
            item_id: item.id.clone(),
        };
        let workflow_id = item.workflow_id.clone();
        let trigger_data = item.trigger_data.clone();
        let prior_context = item.context.clone();

        // The run executes in its own task so a panicking executor is
        // contained, and so an overrunning one can be aborted.
        let mut task = tokio::spawn(async move {
            engine
                .execute_run(&workflow_id, trigger_data, prior_context.as_ref(), &probe)
                .await
        });

        let timeout = Duration::from_millis(self.config.execution_timeout_ms.max(1));
        match tokio::time::timeout(timeout, &mut task).await {
            // Run finished in time.
            Ok(Ok(report)) => {
                let snapshot = report.context.snapshot();
                match report.outcome {
                    RunOutcome::Completed => {
                        self.store.mark_completed(&item.id, Some(&snapshot)).await?;
                        tracing::info!("✅ Item {} completed", item.id);
                        Ok(QueueStatus::Completed)
                    }
                    RunOutcome::Cancelled => {
                        self.store
                            .mark_cancelled(&item.id, "cancelled by operator", Some(&snapshot))
                            .await?;
                        Ok(QueueStatus::Cancelled)
                    }
                    RunOutcome::Failed(error) => {
                        self.finish_with_failure(item, &error, Some(&snapshot)).await
                    }
                }
            }

            // The run task itself died (executor panic). Classified as a
            // fatal failure; the worker carries on.
            Ok(Err(join_error)) => {
                let error = EngineError::ExecutorFailure {
                    node_id: "unknown".to_string(),
                    retryable: false,
                    message: format!("executor task aborted: {join_error}"),
                };
                self.finish_with_failure(item, &error, None).await
            }

            // Per-item timeout: abort the run and release the claim. With
            // a cancellation pending this is the grace period expiring.
            Err(_elapsed) => {
                task.abort();

                let cancel_pending = self
                    .store
                    .cancellation_requested(&item.id)
                    .await
                    .unwrap_or(false);

                if cancel_pending {
                    let error = EngineError::CancellationTimeout {
                        item_id: item.id.clone(),
                    };
                    tracing::warn!("⏱️ {}", error);
                    self.store
                        .mark_cancelled(&item.id, &error.to_string(), None)
                        .await?;
                    Ok(QueueStatus::Cancelled)
                } else {
                    let error = EngineError::ExecutionTimeout {
                        item_id: item.id.clone(),
                        timeout_ms: self.config.execution_timeout_ms,
                    };
                    tracing::warn!("⏱️ {}", error);
                    self.finish_with_failure(item, &error, None).await
                }
            }
        }
    }

    /// Apply the retry policy to a failed run: retryable errors with
    /// budget left go to `retrying` with exponential backoff, the rest
    /// land in `failed`.
    async fn finish_with_failure(
        &self,
        item: &QueueItem,
        error: &EngineError,
        context: Option<&serde_json::Value>,
    ) -> Result<QueueStatus, EngineError> {
        let message = error.to_string();

        // A cancellation requested mid-run wins over the retry policy: the
        // item stops instead of coming back through the queue.
        if self
            .store
            .cancellation_requested(&item.id)
            .await
            .unwrap_or(false)
        {
            self.store
                .mark_cancelled(&item.id, "cancelled by operator", context)
                .await?;
            return Ok(QueueStatus::Cancelled);
        }

        if error.is_retryable() && item.retries_remaining() {
            let delay = self.backoff_delay(item.retry_count);
            let redeliver_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

            self.store
                .mark_retrying(&item.id, &message, redeliver_at, context)
                .await?;
            tracing::warn!(
                "🔁 Item {} scheduled for retry {} of {} in {:?}: {}",
                item.id,
                item.retry_count + 1,
                item.max_retries,
                delay,
                message
            );
            Ok(QueueStatus::Retrying)
        } else {
            self.store.mark_failed(&item.id, &message, context).await?;
            tracing::error!("❌ Item {} failed: {}", item.id, message);
            Ok(QueueStatus::Failed)
        }
    }

    /// Exponential backoff, monotonically non-decreasing in the retry
    /// count: base * 2^attempt, capped.
    fn backoff_delay(&self, retry_count: u32) -> Duration {
        let base = self.config.backoff_base_ms.max(1);
        let cap = self.config.backoff_cap_ms.max(base);
        let exp = retry_count.min(20); // 2^20 * base already dwarfs any cap
        let delay = base.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(cap))
    }

    /// Operator-facing status snapshot.
    pub async fn status(&self) -> QueueStatusReport {
        let mut errors = self.state.recent_errors.lock().unwrap().clone();

        let queue_size = match self.store.queue_size().await {
            Ok(n) => n,
            Err(e) => {
                errors.push(format!("queue size unavailable: {e}"));
                -1
            }
        };
        let current_processing = match self.store.processing_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                errors.push(format!("processing list unavailable: {e}"));
                Vec::new()
            }
        };
        let next_scheduled_at = self.store.next_scheduled_at().await.unwrap_or(None);

        QueueStatusReport {
            is_processing: !current_processing.is_empty(),
            is_paused: self.is_paused(),
            current_processing,
            queue_size,
            last_processed_at: *self.state.last_processed_at.lock().unwrap(),
            next_scheduled_at,
            errors,
        }
    }

    fn record_error(&self, message: String) {
        tracing::error!("💥 {}", message);
        let mut errors = self.state.recent_errors.lock().unwrap();
        errors.push(message);
        let len = errors.len();
        if len > RECENT_ERROR_CAP {
            errors.drain(0..len - RECENT_ERROR_CAP);
        }
    }
}
