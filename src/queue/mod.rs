/// Execution Queue Layer
///
/// The durable queue and its active processor:
/// - Item types and the status state machine
/// - SQLite-backed store with atomic claim-for-processing
/// - Worker loops applying the retry/timeout/cancellation policy
/// - Read-only statistics aggregation

// Item types and the status state machine
pub mod types;

// Durable store; sole writer of status transitions
pub mod store;

// Worker loops and the retry policy
pub mod processor;

// Derived statistics
pub mod stats;

#[cfg(test)]
mod processor_tests;

// Re-export commonly used types
pub use processor::{ProcessReport, QueueProcessor, QueueStatusReport};
pub use stats::{collect_stats, QueueStats};
pub use store::{BulkRetryReport, CancelOutcome, ClearReport, EnqueueRequest, QueueStore};
pub use types::{Priority, QueueItem, QueueStatus};
