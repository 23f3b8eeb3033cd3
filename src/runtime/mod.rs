/// Runtime Execution Layer
///
/// Everything that runs a claimed queue item:
/// - Per-run execution context with node-scoped output namespacing
/// - The NodeExecutor trait and the built-in executor catalog
/// - Lock-free executor registry with config validation
/// - The run engine walking next/true/false references
/// - The schedule trigger adapter feeding the queue

// Per-run execution context
pub mod context;

// NodeExecutor trait and built-in executors
pub mod executor;

// Lock-free executor registry
pub mod registry;

// Run engine walking the node chain
pub mod engine;

// Cron-driven schedule trigger adapter
pub mod scheduler;

// Re-export main types
pub use context::RunContext;
pub use engine::{CancelProbe, NeverCancelled, RunEngine, RunOutcome, RunReport};
pub use executor::{MockBehaviour, MockExecutor, NodeExecutor};
pub use registry::{ExecutorDescriptor, ExecutorRegistry};
pub use scheduler::ScheduleTriggerService;
