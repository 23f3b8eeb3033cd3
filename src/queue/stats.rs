/// Queue statistics aggregation
///
/// A read-only snapshot derived from the item set with SQL aggregates.
/// Numbers here are diagnostic: they can be recomputed at any time, may
/// lag concurrent writes, and are never consulted by the claim path.

use serde::Serialize;
use sqlx::{sqlite::SqlitePool, Row};

use crate::error::EngineError;

/// Derived queue statistics. Durations are in milliseconds.
#[derive(Debug, Default, Clone, Serialize)]
pub struct QueueStats {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub retrying: i64,
    /// Mean `completed_at - started_at` over finished items.
    pub average_processing_time_ms: f64,
    /// Mean `started_at - created_at` over claimed items.
    pub average_wait_time_ms: f64,
    /// Items completed in the last hour.
    pub throughput_per_hour: i64,
    /// failed / (completed + failed), over the whole item set.
    pub error_rate: f64,
}

/// Collect a statistics snapshot from the queue table.
pub async fn collect_stats(pool: &SqlitePool) -> Result<QueueStats, EngineError> {
    let counts = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total,
            COALESCE(SUM(status = 'pending'), 0) AS pending,
            COALESCE(SUM(status = 'processing'), 0) AS processing,
            COALESCE(SUM(status = 'completed'), 0) AS completed,
            COALESCE(SUM(status = 'failed'), 0) AS failed,
            COALESCE(SUM(status = 'cancelled'), 0) AS cancelled,
            COALESCE(SUM(status = 'retrying'), 0) AS retrying
        FROM execution_queue
        "#,
    )
    .fetch_one(pool)
    .await?;

    // julianday arithmetic keeps the averages inside SQLite; one day is
    // 86_400_000 milliseconds.
    let timings = sqlx::query(
        r#"
        SELECT
            COALESCE(AVG(
                CASE WHEN completed_at IS NOT NULL AND started_at IS NOT NULL
                     THEN (julianday(completed_at) - julianday(started_at)) * 86400000.0
                END), 0.0) AS avg_processing_ms,
            COALESCE(AVG(
                CASE WHEN started_at IS NOT NULL
                     THEN (julianday(started_at) - julianday(created_at)) * 86400000.0
                END), 0.0) AS avg_wait_ms,
            COALESCE(SUM(
                status = 'completed'
                AND completed_at >= strftime('%Y-%m-%dT%H:%M:%f', 'now', '-1 hour')
            ), 0) AS last_hour
        FROM execution_queue
        "#,
    )
    .fetch_one(pool)
    .await?;

    let completed: i64 = counts.get("completed");
    let failed: i64 = counts.get("failed");
    let finished = completed + failed;
    let error_rate = if finished > 0 {
        failed as f64 / finished as f64
    } else {
        0.0
    };

    Ok(QueueStats {
        total: counts.get("total"),
        pending: counts.get("pending"),
        processing: counts.get("processing"),
        completed,
        failed,
        cancelled: counts.get("cancelled"),
        retrying: counts.get("retrying"),
        average_processing_time_ms: timings.get("avg_processing_ms"),
        average_wait_time_ms: timings.get("avg_wait_ms"),
        throughput_per_hour: timings.get("last_hour"),
        error_rate,
    })
}
