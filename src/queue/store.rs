/// Durable execution queue store
///
/// The single owner of queue item state. Every status change goes through
/// the guarded operations here: each one is a conditional UPDATE on the
/// expected current status, so a concurrent writer losing the race gets
/// `InvalidStateTransition` instead of silently double-driving an item.
/// Claiming is one atomic UPDATE..RETURNING statement, which is what makes
/// "at most one worker per item" hold across independent workers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use crate::error::EngineError;
use crate::queue::types::{format_ts, parse_ts, Priority, QueueItem, QueueStatus};

/// Insertion contract used by every trigger adapter.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub workflow_id: String,
    pub workflow_name: String,
    pub trigger_data: Value,
    pub priority: Priority,
    /// Earliest eligible dequeue time; `None` means immediately.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub max_retries: u32,
    pub serialize_runs: bool,
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The item was still pending and is now cancelled.
    Cancelled,
    /// The item is processing; the flag is set and the run will stop at
    /// its next checkpoint.
    CancellationRequested,
}

/// Result of a bulk retry operation.
#[derive(Debug, Default, Serialize)]
pub struct BulkRetryReport {
    pub retried: u64,
    pub failed: u64,
    pub errors: Vec<String>,
}

/// Result of clearing the queue.
#[derive(Debug, Default, Serialize)]
pub struct ClearReport {
    pub cleared: u64,
    pub errors: Vec<String>,
}

/// SQLite-backed queue store.
#[derive(Debug, Clone)]
pub struct QueueStore {
    pool: SqlitePool,
}

impl QueueStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the queue table and its claim index. Safe to call repeatedly.
    pub async fn init_schema(&self) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_queue (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                workflow_name TEXT NOT NULL,
                status TEXT NOT NULL,
                priority INTEGER NOT NULL,
                trigger_data JSON NOT NULL,
                context JSON,
                scheduled_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                error_message TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL,
                cancel_requested INTEGER NOT NULL DEFAULT 0,
                serialize_runs INTEGER NOT NULL DEFAULT 0,
                worker_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_execution_queue_claim
            ON execution_queue(status, priority, scheduled_at, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_execution_queue_workflow
            ON execution_queue(workflow_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a new pending item. Called by every trigger adapter.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<QueueItem, EngineError> {
        let now = Utc::now();
        let item = QueueItem {
            id: Uuid::new_v4().to_string(),
            workflow_id: request.workflow_id,
            workflow_name: request.workflow_name,
            status: QueueStatus::Pending,
            priority: request.priority,
            trigger_data: request.trigger_data,
            context: None,
            scheduled_at: request.scheduled_at.unwrap_or(now),
            started_at: None,
            completed_at: None,
            error_message: None,
            retry_count: 0,
            max_retries: request.max_retries,
            cancel_requested: false,
            serialize_runs: request.serialize_runs,
            worker_id: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO execution_queue
                (id, workflow_id, workflow_name, status, priority, trigger_data,
                 scheduled_at, retry_count, max_retries, cancel_requested,
                 serialize_runs, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, 0, ?, ?, ?)
            "#,
        )
        .bind(&item.id)
        .bind(&item.workflow_id)
        .bind(&item.workflow_name)
        .bind(item.status.as_str())
        .bind(item.priority.rank())
        .bind(serde_json::to_string(&item.trigger_data)?)
        .bind(format_ts(item.scheduled_at))
        .bind(item.max_retries as i64)
        .bind(item.serialize_runs as i64)
        .bind(format_ts(item.created_at))
        .bind(format_ts(item.updated_at))
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            "📥 Enqueued item {} for workflow '{}' ({} priority)",
            item.id,
            item.workflow_id,
            item.priority.as_str()
        );

        Ok(item)
    }

    /// Atomically claim the next eligible item for a worker.
    ///
    /// Eligibility and ordering in one statement: pending, due, not blocked
    /// by a serialized sibling; highest priority first, then oldest
    /// scheduled time, then oldest creation time. The inner SELECT and the
    /// outer conditional UPDATE execute as a single SQLite statement, so
    /// two workers can never claim the same row.
    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<QueueItem>, EngineError> {
        let now = format_ts(Utc::now());

        let row = sqlx::query(
            r#"
            UPDATE execution_queue
            SET status = 'processing',
                started_at = ?,
                updated_at = ?,
                worker_id = ?
            WHERE id = (
                SELECT q.id FROM execution_queue q
                WHERE q.status = 'pending'
                  AND q.scheduled_at <= ?
                  AND (q.serialize_runs = 0 OR NOT EXISTS (
                        SELECT 1 FROM execution_queue p
                        WHERE p.workflow_id = q.workflow_id
                          AND p.status = 'processing'
                      ))
                ORDER BY q.priority DESC, q.scheduled_at ASC, q.created_at ASC
                LIMIT 1
            )
            AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(worker_id)
        .bind(&now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| item_from_row(&r)).transpose()
    }

    /// processing → completed.
    pub async fn mark_completed(
        &self,
        item_id: &str,
        context: Option<&Value>,
    ) -> Result<(), EngineError> {
        let now = format_ts(Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE execution_queue
            SET status = 'completed', completed_at = ?, updated_at = ?, context = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(encode_context(context)?)
        .bind(item_id)
        .execute(&self.pool)
        .await?;

        self.check_transitioned(result.rows_affected(), item_id, QueueStatus::Completed)
            .await
    }

    /// processing → failed. Used for fatal errors and exhausted retries.
    pub async fn mark_failed(
        &self,
        item_id: &str,
        error_message: &str,
        context: Option<&Value>,
    ) -> Result<(), EngineError> {
        let now = format_ts(Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE execution_queue
            SET status = 'failed', completed_at = ?, updated_at = ?,
                error_message = ?, context = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(error_message)
        .bind(encode_context(context)?)
        .bind(item_id)
        .execute(&self.pool)
        .await?;

        self.check_transitioned(result.rows_affected(), item_id, QueueStatus::Failed)
            .await
    }

    /// processing → retrying. Increments the retry counter, clears the
    /// claim and stamps the redelivery time into `scheduled_at`. The
    /// `retry_count < max_retries` guard is part of the statement, so an
    /// over-budget retry attempt is rejected at the same atomicity level
    /// as the status check.
    pub async fn mark_retrying(
        &self,
        item_id: &str,
        error_message: &str,
        redeliver_at: DateTime<Utc>,
        context: Option<&Value>,
    ) -> Result<(), EngineError> {
        let now = format_ts(Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE execution_queue
            SET status = 'retrying', retry_count = retry_count + 1,
                started_at = NULL, worker_id = NULL,
                scheduled_at = ?, updated_at = ?, error_message = ?, context = ?
            WHERE id = ? AND status = 'processing' AND retry_count < max_retries
            "#,
        )
        .bind(format_ts(redeliver_at))
        .bind(&now)
        .bind(error_message)
        .bind(encode_context(context)?)
        .bind(item_id)
        .execute(&self.pool)
        .await?;

        self.check_transitioned(result.rows_affected(), item_id, QueueStatus::Retrying)
            .await
    }

    /// Sweep due retrying items back to pending (retrying → pending).
    /// Returns how many were redelivered.
    pub async fn redeliver_due(&self) -> Result<u64, EngineError> {
        let now = format_ts(Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE execution_queue
            SET status = 'pending', updated_at = ?
            WHERE status = 'retrying' AND scheduled_at <= ?
            "#,
        )
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Cancel an item. Pending items flip to cancelled immediately;
    /// processing items get the cooperative flag and are finished off by
    /// the worker at its next checkpoint. Anything else is rejected.
    pub async fn request_cancel(&self, item_id: &str) -> Result<CancelOutcome, EngineError> {
        let now = format_ts(Utc::now());

        let direct = sqlx::query(
            r#"
            UPDATE execution_queue
            SET status = 'cancelled', completed_at = ?, updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(item_id)
        .execute(&self.pool)
        .await?;

        if direct.rows_affected() > 0 {
            tracing::info!("🛑 Cancelled pending queue item {}", item_id);
            return Ok(CancelOutcome::Cancelled);
        }

        let flagged = sqlx::query(
            r#"
            UPDATE execution_queue
            SET cancel_requested = 1, updated_at = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(&now)
        .bind(item_id)
        .execute(&self.pool)
        .await?;

        if flagged.rows_affected() > 0 {
            tracing::info!("🛑 Requested cancellation of processing item {}", item_id);
            return Ok(CancelOutcome::CancellationRequested);
        }

        Err(self.invalid_transition(item_id, QueueStatus::Cancelled).await)
    }

    /// processing → cancelled, after the run observed the flag (or blew
    /// the cancellation grace period).
    pub async fn mark_cancelled(
        &self,
        item_id: &str,
        message: &str,
        context: Option<&Value>,
    ) -> Result<(), EngineError> {
        let now = format_ts(Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE execution_queue
            SET status = 'cancelled', completed_at = ?, updated_at = ?,
                error_message = ?, context = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(message)
        .bind(encode_context(context)?)
        .bind(item_id)
        .execute(&self.pool)
        .await?;

        self.check_transitioned(result.rows_affected(), item_id, QueueStatus::Cancelled)
            .await
    }

    /// Whether cancellation has been requested for an item. Polled by the
    /// run engine between node executions.
    pub async fn cancellation_requested(&self, item_id: &str) -> Result<bool, EngineError> {
        let row = sqlx::query("SELECT cancel_requested FROM execution_queue WHERE id = ?")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row
            .map(|r| r.get::<i64, _>("cancel_requested") != 0)
            .unwrap_or(false))
    }

    /// Operator retry of a single failed item (failed → pending). Rejected
    /// when the retry budget is exhausted.
    pub async fn retry_item(&self, item_id: &str) -> Result<(), EngineError> {
        let now = format_ts(Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE execution_queue
            SET status = 'pending', scheduled_at = ?, updated_at = ?,
                started_at = NULL, completed_at = NULL, worker_id = NULL
            WHERE id = ? AND status = 'failed' AND retry_count < max_retries
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(item_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        match self.get(item_id).await? {
            None => Err(EngineError::UnknownQueueItem(item_id.to_string())),
            Some(item) if item.status == QueueStatus::Failed => {
                Err(EngineError::RetryBudgetExhausted {
                    item_id: item_id.to_string(),
                })
            }
            Some(item) => Err(EngineError::InvalidStateTransition {
                item_id: item_id.to_string(),
                from: item.status,
                to: QueueStatus::Pending,
            }),
        }
    }

    /// Operator bulk retry of failed items with budget remaining.
    pub async fn retry_failed(&self) -> Result<BulkRetryReport, EngineError> {
        let ids = self.ids_with_status(QueueStatus::Failed).await?;
        let mut report = BulkRetryReport::default();

        for id in ids {
            match self.retry_item(&id).await {
                Ok(()) => report.retried += 1,
                // Exhausted items are simply not eligible for this op.
                Err(EngineError::RetryBudgetExhausted { .. }) => {}
                Err(e) => {
                    report.failed += 1;
                    report.errors.push(format!("{id}: {e}"));
                }
            }
        }

        Ok(report)
    }

    /// Operator override: re-enqueue every failed item regardless of
    /// budget, resetting the retry counter. Completed and cancelled items
    /// are immutable terminals and stay untouched.
    pub async fn retry_all(&self) -> Result<BulkRetryReport, EngineError> {
        let ids = self.ids_with_status(QueueStatus::Failed).await?;
        let mut report = BulkRetryReport::default();

        for id in ids {
            let now = format_ts(Utc::now());
            let result = sqlx::query(
                r#"
                UPDATE execution_queue
                SET status = 'pending', retry_count = 0, scheduled_at = ?,
                    updated_at = ?, started_at = NULL, completed_at = NULL,
                    worker_id = NULL, error_message = NULL
                WHERE id = ? AND status = 'failed'
                "#,
            )
            .bind(&now)
            .bind(&now)
            .bind(&id)
            .execute(&self.pool)
            .await;

            match result {
                Ok(r) if r.rows_affected() > 0 => report.retried += 1,
                Ok(_) => {
                    report.failed += 1;
                    report.errors.push(format!("{id}: status changed concurrently"));
                }
                Err(e) => {
                    report.failed += 1;
                    report.errors.push(format!("{id}: {e}"));
                }
            }
        }

        Ok(report)
    }

    /// Remove all pending and failed items. Irreversible.
    pub async fn clear(&self) -> Result<ClearReport, EngineError> {
        let result =
            sqlx::query("DELETE FROM execution_queue WHERE status IN ('pending', 'failed')")
                .execute(&self.pool)
                .await?;

        tracing::info!("🧹 Cleared {} queue items", result.rows_affected());

        Ok(ClearReport {
            cleared: result.rows_affected(),
            errors: Vec::new(),
        })
    }

    /// Change an item's dequeue priority. Only meaningful while the item
    /// is still waiting (pending or retrying).
    pub async fn update_priority(
        &self,
        item_id: &str,
        priority: Priority,
    ) -> Result<(), EngineError> {
        let now = format_ts(Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE execution_queue
            SET priority = ?, updated_at = ?
            WHERE id = ? AND status IN ('pending', 'retrying')
            "#,
        )
        .bind(priority.rank())
        .bind(&now)
        .bind(item_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        match self.get(item_id).await? {
            None => Err(EngineError::UnknownQueueItem(item_id.to_string())),
            Some(item) => Err(EngineError::ItemNotUpdatable {
                item_id: item_id.to_string(),
                status: item.status,
            }),
        }
    }

    pub async fn get(&self, item_id: &str) -> Result<Option<QueueItem>, EngineError> {
        let row = sqlx::query("SELECT * FROM execution_queue WHERE id = ?")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| item_from_row(&r)).transpose()
    }

    /// List items, optionally filtered by status, newest first.
    pub async fn list(
        &self,
        status: Option<QueueStatus>,
        limit: i64,
    ) -> Result<Vec<QueueItem>, EngineError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    r#"
                    SELECT * FROM execution_queue WHERE status = ?
                    ORDER BY created_at DESC LIMIT ?
                    "#,
                )
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM execution_queue ORDER BY created_at DESC LIMIT ?")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(item_from_row).collect()
    }

    /// Number of items currently waiting to run.
    pub async fn queue_size(&self) -> Result<i64, EngineError> {
        let row =
            sqlx::query("SELECT COUNT(*) AS n FROM execution_queue WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await?;
        Ok(row.get("n"))
    }

    /// Ids of items a worker currently holds.
    pub async fn processing_ids(&self) -> Result<Vec<String>, EngineError> {
        let rows = sqlx::query("SELECT id FROM execution_queue WHERE status = 'processing'")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    /// Earliest scheduled time among waiting items.
    pub async fn next_scheduled_at(&self) -> Result<Option<DateTime<Utc>>, EngineError> {
        let row = sqlx::query(
            r#"
            SELECT MIN(scheduled_at) AS next FROM execution_queue
            WHERE status IN ('pending', 'retrying')
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let next: Option<String> = row.get("next");
        Ok(next.as_deref().and_then(parse_ts))
    }

    async fn ids_with_status(&self, status: QueueStatus) -> Result<Vec<String>, EngineError> {
        let rows = sqlx::query(
            "SELECT id FROM execution_queue WHERE status = ? ORDER BY created_at ASC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    async fn check_transitioned(
        &self,
        rows_affected: u64,
        item_id: &str,
        to: QueueStatus,
    ) -> Result<(), EngineError> {
        if rows_affected > 0 {
            Ok(())
        } else {
            Err(self.invalid_transition(item_id, to).await)
        }
    }

    /// Build the precise rejection error for a transition that matched no
    /// row: either the item is gone or its current status forbids the move.
    async fn invalid_transition(&self, item_id: &str, to: QueueStatus) -> EngineError {
        match self.get(item_id).await {
            Ok(Some(item)) => EngineError::InvalidStateTransition {
                item_id: item_id.to_string(),
                from: item.status,
                to,
            },
            Ok(None) => EngineError::UnknownQueueItem(item_id.to_string()),
            Err(e) => e,
        }
    }
}

fn encode_context(context: Option<&Value>) -> Result<Option<String>, EngineError> {
    context
        .map(serde_json::to_string)
        .transpose()
        .map_err(EngineError::from)
}

fn item_from_row(row: &SqliteRow) -> Result<QueueItem, EngineError> {
    let status_raw: String = row.get("status");
    let status = QueueStatus::parse(&status_raw)
        .ok_or_else(|| decode_error("status", &status_raw))?;

    let trigger_raw: String = row.get("trigger_data");
    let trigger_data: Value = serde_json::from_str(&trigger_raw)?;

    let context_raw: Option<String> = row.get("context");
    let context = context_raw
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;

    Ok(QueueItem {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        workflow_name: row.get("workflow_name"),
        status,
        priority: Priority::from_rank(row.get("priority")),
        trigger_data,
        context,
        scheduled_at: get_ts(row, "scheduled_at")?,
        started_at: get_opt_ts(row, "started_at")?,
        completed_at: get_opt_ts(row, "completed_at")?,
        error_message: row.get("error_message"),
        retry_count: row.get::<i64, _>("retry_count") as u32,
        max_retries: row.get::<i64, _>("max_retries") as u32,
        cancel_requested: row.get::<i64, _>("cancel_requested") != 0,
        serialize_runs: row.get::<i64, _>("serialize_runs") != 0,
        worker_id: row.get("worker_id"),
        created_at: get_ts(row, "created_at")?,
        updated_at: get_ts(row, "updated_at")?,
    })
}

fn get_ts(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, EngineError> {
    let raw: String = row.get(column);
    parse_ts(&raw).ok_or_else(|| decode_error(column, &raw))
}

fn get_opt_ts(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>, EngineError> {
    let raw: Option<String> = row.get(column);
    match raw {
        None => Ok(None),
        Some(raw) => parse_ts(&raw).map(Some).ok_or_else(|| decode_error(column, &raw)),
    }
}

fn decode_error(column: &str, value: &str) -> EngineError {
    EngineError::Database(sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("unexpected value '{value}'").into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::HashSet;

    async fn memory_store() -> QueueStore {
        // A single connection keeps every query on the same in-memory
        // database; claim atomicity is per-statement either way.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        let store = QueueStore::new(pool);
        store.init_schema().await.expect("schema");
        store
    }

    fn request(workflow_id: &str, priority: Priority) -> EnqueueRequest {
        EnqueueRequest {
            workflow_id: workflow_id.to_string(),
            workflow_name: format!("{workflow_id} name"),
            trigger_data: serde_json::json!({ "source": "test" }),
            priority,
            scheduled_at: None,
            max_retries: 3,
            serialize_runs: false,
        }
    }

    #[tokio::test]
    async fn enqueue_creates_a_pending_item_within_retry_bounds() {
        let store = memory_store().await;
        let item = store.enqueue(request("wf", Priority::Normal)).await.unwrap();

        assert_eq!(item.status, QueueStatus::Pending);
        assert!(item.retries_within_bounds());

        let stored = store.get(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, QueueStatus::Pending);
        assert_eq!(stored.priority, Priority::Normal);
    }

    #[tokio::test]
    async fn claim_order_is_priority_then_scheduled_time() {
        let store = memory_store().await;
        let t1 = Utc::now() - chrono::Duration::minutes(10);
        let t2 = Utc::now() - chrono::Duration::minutes(5);

        let mut critical_t2 = request("wf", Priority::Critical);
        critical_t2.scheduled_at = Some(t2);
        let mut high_t1 = request("wf", Priority::High);
        high_t1.scheduled_at = Some(t1);
        let mut critical_t1 = request("wf", Priority::Critical);
        critical_t1.scheduled_at = Some(t1);

        let critical_t2 = store.enqueue(critical_t2).await.unwrap();
        let high_t1 = store.enqueue(high_t1).await.unwrap();
        let critical_t1 = store.enqueue(critical_t1).await.unwrap();

        let first = store.claim_next("w1").await.unwrap().unwrap();
        let second = store.claim_next("w1").await.unwrap().unwrap();
        let third = store.claim_next("w1").await.unwrap().unwrap();

        assert_eq!(first.id, critical_t1.id);
        assert_eq!(second.id, critical_t2.id);
        assert_eq!(third.id, high_t1.id);
        assert!(store.claim_next("w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn future_scheduled_items_are_never_claimed() {
        let store = memory_store().await;
        let mut deferred = request("wf", Priority::Critical);
        deferred.scheduled_at = Some(Utc::now() + chrono::Duration::hours(1));
        store.enqueue(deferred).await.unwrap();

        assert!(store.claim_next("w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn racing_claims_never_hand_out_the_same_item() {
        let store = memory_store().await;
        for _ in 0..4 {
            store.enqueue(request("wf", Priority::Normal)).await.unwrap();
        }

        let mut handles = Vec::new();
        for worker in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.claim_next(&format!("w{worker}")).await.unwrap()
            }));
        }

        let mut claimed = Vec::new();
        for handle in handles {
            if let Some(item) = handle.await.unwrap() {
                claimed.push(item.id);
            }
        }

        // Exactly as many successful claims as items, no duplicates.
        assert_eq!(claimed.len(), 4);
        let unique: HashSet<_> = claimed.iter().collect();
        assert_eq!(unique.len(), 4);
    }

    #[tokio::test]
    async fn claim_sets_started_at_and_worker() {
        let store = memory_store().await;
        store.enqueue(request("wf", Priority::Normal)).await.unwrap();

        let item = store.claim_next("worker-7").await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Processing);
        assert!(item.started_at.is_some());
        assert_eq!(item.worker_id.as_deref(), Some("worker-7"));
    }

    #[tokio::test]
    async fn cancelled_items_never_transition_again() {
        let store = memory_store().await;
        let item = store.enqueue(request("wf", Priority::Normal)).await.unwrap();

        assert_eq!(
            store.request_cancel(&item.id).await.unwrap(),
            CancelOutcome::Cancelled
        );

        // No path out of cancelled: not completable, not retryable, not
        // cancellable again.
        assert!(matches!(
            store.mark_completed(&item.id, None).await.unwrap_err(),
            EngineError::InvalidStateTransition { .. }
        ));
        assert!(matches!(
            store.retry_item(&item.id).await.unwrap_err(),
            EngineError::InvalidStateTransition { .. }
        ));
        assert!(matches!(
            store.request_cancel(&item.id).await.unwrap_err(),
            EngineError::InvalidStateTransition { .. }
        ));

        let stored = store.get(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, QueueStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancelling_a_processing_item_sets_the_flag() {
        let store = memory_store().await;
        let item = store.enqueue(request("wf", Priority::Normal)).await.unwrap();
        store.claim_next("w1").await.unwrap().unwrap();

        assert_eq!(
            store.request_cancel(&item.id).await.unwrap(),
            CancelOutcome::CancellationRequested
        );
        assert!(store.cancellation_requested(&item.id).await.unwrap());

        store.mark_cancelled(&item.id, "cancelled by operator", None).await.unwrap();
        let stored = store.get(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, QueueStatus::Cancelled);
    }

    #[tokio::test]
    async fn retry_of_exhausted_item_is_rejected() {
        let store = memory_store().await;
        let mut req = request("wf", Priority::Normal);
        req.max_retries = 0;
        let item = store.enqueue(req).await.unwrap();

        store.claim_next("w1").await.unwrap().unwrap();
        store.mark_failed(&item.id, "boom", None).await.unwrap();

        assert!(matches!(
            store.retry_item(&item.id).await.unwrap_err(),
            EngineError::RetryBudgetExhausted { .. }
        ));
    }

    #[tokio::test]
    async fn retry_of_failed_item_with_budget_moves_it_to_pending() {
        let store = memory_store().await;
        let item = store.enqueue(request("wf", Priority::Normal)).await.unwrap();

        store.claim_next("w1").await.unwrap().unwrap();
        store.mark_failed(&item.id, "boom", None).await.unwrap();

        store.retry_item(&item.id).await.unwrap();
        let stored = store.get(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, QueueStatus::Pending);
    }

    #[tokio::test]
    async fn retrying_items_redeliver_when_due() {
        let store = memory_store().await;
        let item = store.enqueue(request("wf", Priority::Normal)).await.unwrap();

        store.claim_next("w1").await.unwrap().unwrap();
        store
            .mark_retrying(&item.id, "flaky upstream", Utc::now(), None)
            .await
            .unwrap();

        let stored = store.get(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, QueueStatus::Retrying);
        assert_eq!(stored.retry_count, 1);
        assert!(stored.started_at.is_none());
        assert!(stored.retries_within_bounds());

        assert_eq!(store.redeliver_due().await.unwrap(), 1);
        let stored = store.get(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, QueueStatus::Pending);
    }

    #[tokio::test]
    async fn redelivery_waits_for_the_backoff_deadline() {
        let store = memory_store().await;
        let item = store.enqueue(request("wf", Priority::Normal)).await.unwrap();

        store.claim_next("w1").await.unwrap().unwrap();
        store
            .mark_retrying(
                &item.id,
                "flaky upstream",
                Utc::now() + chrono::Duration::minutes(5),
                None,
            )
            .await
            .unwrap();

        assert_eq!(store.redeliver_due().await.unwrap(), 0);
        assert!(store.claim_next("w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mark_retrying_refuses_to_exceed_the_budget() {
        let store = memory_store().await;
        let mut req = request("wf", Priority::Normal);
        req.max_retries = 1;
        let item = store.enqueue(req).await.unwrap();

        store.claim_next("w1").await.unwrap().unwrap();
        store
            .mark_retrying(&item.id, "try 1", Utc::now(), None)
            .await
            .unwrap();
        store.redeliver_due().await.unwrap();
        store.claim_next("w1").await.unwrap().unwrap();

        // Budget is spent; the second retry attempt must be rejected.
        assert!(store
            .mark_retrying(&item.id, "try 2", Utc::now(), None)
            .await
            .is_err());
        // The exhausted item fails instead.
        store.mark_failed(&item.id, "try 2", None).await.unwrap();

        let stored = store.get(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, QueueStatus::Failed);
        assert!(stored.retries_within_bounds());
    }

    #[tokio::test]
    async fn serialized_workflows_run_one_item_at_a_time() {
        let store = memory_store().await;
        let mut first = request("wf-serial", Priority::Normal);
        first.serialize_runs = true;
        let mut second = request("wf-serial", Priority::Normal);
        second.serialize_runs = true;
        let other = request("wf-free", Priority::Low);

        let first = store.enqueue(first).await.unwrap();
        store.enqueue(second).await.unwrap();
        store.enqueue(other).await.unwrap();

        let claimed = store.claim_next("w1").await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);

        // The serialized sibling is blocked, but other workflows still run.
        let next = store.claim_next("w2").await.unwrap().unwrap();
        assert_eq!(next.workflow_id, "wf-free");
        assert!(store.claim_next("w3").await.unwrap().is_none());

        store.mark_completed(&first.id, None).await.unwrap();
        let unblocked = store.claim_next("w3").await.unwrap().unwrap();
        assert_eq!(unblocked.workflow_id, "wf-serial");
    }

    #[tokio::test]
    async fn priority_updates_only_apply_to_waiting_items() {
        let store = memory_store().await;
        let item = store.enqueue(request("wf", Priority::Low)).await.unwrap();

        store.update_priority(&item.id, Priority::Critical).await.unwrap();
        let stored = store.get(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.priority, Priority::Critical);

        store.claim_next("w1").await.unwrap().unwrap();
        store.mark_completed(&item.id, None).await.unwrap();

        assert!(matches!(
            store.update_priority(&item.id, Priority::Low).await.unwrap_err(),
            EngineError::ItemNotUpdatable { .. }
        ));
    }

    #[tokio::test]
    async fn clear_removes_pending_and_failed_only() {
        let store = memory_store().await;

        let failed = store.enqueue(request("wf", Priority::Normal)).await.unwrap();
        store.claim_next("w1").await.unwrap().unwrap();
        store.mark_failed(&failed.id, "x", None).await.unwrap();

        let done = store.enqueue(request("wf", Priority::Normal)).await.unwrap();
        store.claim_next("w1").await.unwrap().unwrap();
        store.mark_completed(&done.id, None).await.unwrap();

        let pending = store.enqueue(request("wf", Priority::Normal)).await.unwrap();

        let report = store.clear().await.unwrap();
        assert_eq!(report.cleared, 2);
        assert!(store.get(&pending.id).await.unwrap().is_none());
        assert!(store.get(&failed.id).await.unwrap().is_none());
        assert!(store.get(&done.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn bulk_retry_all_resets_budgets() {
        let store = memory_store().await;
        let mut req = request("wf", Priority::Normal);
        req.max_retries = 0;
        let item = store.enqueue(req).await.unwrap();

        store.claim_next("w1").await.unwrap().unwrap();
        store.mark_failed(&item.id, "x", None).await.unwrap();

        // retry_failed skips it (no budget)…
        let report = store.retry_failed().await.unwrap();
        assert_eq!(report.retried, 0);

        // …but retry_all is the unconditional operator override.
        let report = store.retry_all().await.unwrap();
        assert_eq!(report.retried, 1);
        let stored = store.get(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, QueueStatus::Pending);
        assert_eq!(stored.retry_count, 0);
    }
}
