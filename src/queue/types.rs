/// Execution queue item types and the status state machine
///
/// A queue item is one scheduled/executing instance of a workflow run. The
/// store is the only writer of status transitions; everything here encodes
/// which transitions are legal so the store can reject the rest with
/// `InvalidStateTransition`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Lifecycle status of a queue item.
///
/// `pending -> processing -> {completed | failed | retrying | cancelled}`,
/// with `retrying -> pending` on redelivery and `retrying -> failed` when
/// attempts are exhausted. `failed -> pending` exists for operator-driven
/// retries. `completed` and `cancelled` are immutable terminals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
            QueueStatus::Cancelled => "cancelled",
            QueueStatus::Retrying => "retrying",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QueueStatus::Pending),
            "processing" => Some(QueueStatus::Processing),
            "completed" => Some(QueueStatus::Completed),
            "failed" => Some(QueueStatus::Failed),
            "cancelled" => Some(QueueStatus::Cancelled),
            "retrying" => Some(QueueStatus::Retrying),
            _ => None,
        }
    }

    /// Terminal states never leave via the processor. `failed` still accepts
    /// the operator retry transition, so only `completed` and `cancelled`
    /// are fully immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueStatus::Completed | QueueStatus::Failed | QueueStatus::Cancelled
        )
    }

    /// The transition table. This is the single source of truth the store
    /// consults before touching a row; anything not listed here is an
    /// `InvalidStateTransition`.
    pub fn can_transition(&self, to: QueueStatus) -> bool {
        use QueueStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Retrying)
                | (Processing, Cancelled)
                | (Retrying, Pending)
                | (Retrying, Failed)
                // Operator-driven retry of a failed item; the retry-budget
                // check happens in the store operation, not here.
                | (Failed, Pending)
        )
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dequeue priority. Ordering is by `rank` descending, so `critical` items
/// always claim before `low` ones regardless of age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    /// Integer rank stored in the database so `ORDER BY priority DESC`
    /// works without string gymnastics.
    pub fn rank(&self) -> i64 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Critical => 3,
        }
    }

    pub fn from_rank(rank: i64) -> Self {
        match rank {
            r if r <= 0 => Priority::Low,
            1 => Priority::Normal,
            2 => Priority::High,
            _ => Priority::Critical,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Priority::Low),
            "normal" => Some(Priority::Normal),
            "high" => Some(Priority::High),
            "critical" => Some(Priority::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// One scheduled or executing workflow run.
///
/// `workflow_name` is denormalized for display only; `serialize_runs` is
/// denormalized from the definition at enqueue time so the claim statement
/// can enforce per-workflow exclusivity without a join.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// Unique item id, generated at enqueue time.
    pub id: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: QueueStatus,
    pub priority: Priority,
    /// Opaque payload supplied by the triggering adapter.
    pub trigger_data: Value,
    /// Last persisted execution-context snapshot, kept for audit after the
    /// run reaches a terminal state.
    pub context: Option<Value>,
    /// Earliest eligible dequeue time. For `retrying` items this doubles as
    /// the redelivery time.
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Last failure detail; present only in `failed` / `retrying`.
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Cooperative-cancellation flag, observed by the run engine between
    /// node executions.
    pub cancel_requested: bool,
    /// Whether runs of this workflow must not overlap.
    pub serialize_runs: bool,
    /// Worker that currently holds (or last held) the claim.
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    /// Invariant check: `0 <= retry_count <= max_retries`.
    pub fn retries_within_bounds(&self) -> bool {
        self.retry_count <= self.max_retries
    }

    pub fn retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Fixed-width RFC 3339 rendering so timestamp columns compare correctly as
/// text in SQLite (`scheduled_at <= now` and the dequeue ORDER BY both rely
/// on lexicographic order).
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_can_only_move_to_processing_or_cancelled() {
        let from = QueueStatus::Pending;
        assert!(from.can_transition(QueueStatus::Processing));
        assert!(from.can_transition(QueueStatus::Cancelled));
        assert!(!from.can_transition(QueueStatus::Completed));
        assert!(!from.can_transition(QueueStatus::Failed));
        assert!(!from.can_transition(QueueStatus::Retrying));
    }

    #[test]
    fn processing_fans_out_to_all_outcomes() {
        let from = QueueStatus::Processing;
        for to in [
            QueueStatus::Completed,
            QueueStatus::Failed,
            QueueStatus::Retrying,
            QueueStatus::Cancelled,
        ] {
            assert!(from.can_transition(to), "processing -> {to} must be legal");
        }
        assert!(!from.can_transition(QueueStatus::Pending));
    }

    #[test]
    fn cancelled_is_a_dead_end() {
        let from = QueueStatus::Cancelled;
        for to in [
            QueueStatus::Pending,
            QueueStatus::Processing,
            QueueStatus::Completed,
            QueueStatus::Failed,
            QueueStatus::Retrying,
            QueueStatus::Cancelled,
        ] {
            assert!(!from.can_transition(to), "cancelled -> {to} must be rejected");
        }
    }

    #[test]
    fn completed_is_a_dead_end() {
        let from = QueueStatus::Completed;
        for to in [
            QueueStatus::Pending,
            QueueStatus::Processing,
            QueueStatus::Failed,
            QueueStatus::Retrying,
            QueueStatus::Cancelled,
        ] {
            assert!(!from.can_transition(to));
        }
    }

    #[test]
    fn retrying_redelivers_or_exhausts() {
        assert!(QueueStatus::Retrying.can_transition(QueueStatus::Pending));
        assert!(QueueStatus::Retrying.can_transition(QueueStatus::Failed));
        assert!(!QueueStatus::Retrying.can_transition(QueueStatus::Processing));
        assert!(!QueueStatus::Retrying.can_transition(QueueStatus::Cancelled));
    }

    #[test]
    fn priority_rank_orders_critical_first() {
        assert!(Priority::Critical.rank() > Priority::High.rank());
        assert!(Priority::High.rank() > Priority::Normal.rank());
        assert!(Priority::Normal.rank() > Priority::Low.rank());
    }

    #[test]
    fn priority_rank_round_trips() {
        for p in [
            Priority::Low,
            Priority::Normal,
            Priority::High,
            Priority::Critical,
        ] {
            assert_eq!(Priority::from_rank(p.rank()), p);
        }
    }

    #[test]
    fn status_strings_round_trip() {
        for s in [
            QueueStatus::Pending,
            QueueStatus::Processing,
            QueueStatus::Completed,
            QueueStatus::Failed,
            QueueStatus::Cancelled,
            QueueStatus::Retrying,
        ] {
            assert_eq!(QueueStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(QueueStatus::parse("paused"), None);
    }

    #[test]
    fn timestamps_render_fixed_width_and_sort_lexicographically() {
        let early = Utc::now();
        let late = early + chrono::Duration::seconds(90);
        let a = format_ts(early);
        let b = format_ts(late);
        assert_eq!(a.len(), b.len());
        assert!(a < b);
        // Rendering truncates to microseconds, so compare at that precision.
        assert_eq!(
            parse_ts(&a).unwrap().timestamp_micros(),
            early.timestamp_micros()
        );
    }
}
