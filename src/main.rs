/// Campflow: workflow automation engine for marketing suites
///
/// Main entry point. Initializes logging and configuration, then starts
/// the HTTP server with the queue workers and trigger adapters running.
/// The server provides:
/// - Workflow definition API at /api/workflows/*
/// - Queue operations at /api/queue/*
/// - Webhook triggers at /webhook/{workflow_id}/*
/// - Health check at /healthz

use campflow::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    // Load configuration (defaults with CAMPFLOW_* env overrides)
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
