/// Configuration management for the campflow engine
///
/// Handles server binding, database location and queue processing
/// parameters. Defaults can be overridden through CAMPFLOW_* environment
/// variables for container deployments.

use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding the SQLite database file (default: "data")
    pub data_dir: String,
}

/// Queue processing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Number of concurrent processor workers.
    pub workers: usize,
    /// Sleep between polls when no eligible item is available.
    pub poll_interval_ms: u64,
    /// Per-item execution timeout; a run that overstays is treated as a
    /// retryable failure and the claim is released.
    pub execution_timeout_ms: u64,
    /// Retry budget applied to items enqueued without an explicit one.
    pub default_max_retries: u32,
    /// First retry delay; doubles per attempt up to the cap.
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment.
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("CAMPFLOW_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("CAMPFLOW_PORT", 3010),
            },
            database: DatabaseConfig {
                data_dir: std::env::var("CAMPFLOW_DATA_DIR")
                    .unwrap_or_else(|_| "data".to_string()),
            },
            queue: QueueConfig::default(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: env_or("CAMPFLOW_QUEUE_WORKERS", 2),
            poll_interval_ms: env_or("CAMPFLOW_QUEUE_POLL_MS", 500),
            execution_timeout_ms: env_or("CAMPFLOW_QUEUE_TIMEOUT_MS", 60_000),
            default_max_retries: env_or("CAMPFLOW_QUEUE_MAX_RETRIES", 3),
            backoff_base_ms: env_or("CAMPFLOW_QUEUE_BACKOFF_BASE_MS", 2_000),
            backoff_cap_ms: env_or("CAMPFLOW_QUEUE_BACKOFF_CAP_MS", 300_000),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
