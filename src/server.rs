/// Server setup and initialization
///
/// Wires together all components: stores, registries, the run engine,
/// queue workers, the schedule trigger service and the HTTP routes.

use crate::{
    api::{
        queue::create_queue_routes,
        webhooks::create_webhook_routes,
        workflows::{create_workflow_routes, AppState},
    },
    config::Config,
    queue::{processor::QueueProcessor, store::QueueStore},
    runtime::{engine::RunEngine, registry::ExecutorRegistry, scheduler::ScheduleTriggerService},
    workflow::{registry::DefinitionRegistry, storage::DefinitionStorage},
};
use anyhow::Result;
use axum::{routing::get, Router};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Create the main Axum application with all routes and background
/// services running.
pub async fn create_app(config: Config) -> Result<Router> {
    tracing::info!("📁 Ensuring data directory exists: {}", config.database.data_dir);
    std::fs::create_dir_all(&config.database.data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create data directory: {}", e))?;

    tracing::info!("🗄️ Opening SQLite database");
    let options = SqliteConnectOptions::new()
        .filename(format!("{}/campflow.db", config.database.data_dir))
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;

    tracing::info!("📋 Initializing definition storage");
    let storage = DefinitionStorage::new(pool.clone());
    storage.init_schema().await?;

    tracing::info!("📦 Initializing execution queue store");
    let store = QueueStore::new(pool);
    store.init_schema().await?;

    tracing::info!("📊 Initializing definition registry");
    let definitions = Arc::new(DefinitionRegistry::new(storage.clone()));
    definitions.init_from_storage().await?;

    tracing::info!("⚙️ Registering built-in executors");
    let executors = Arc::new(ExecutorRegistry::with_builtins());

    tracing::info!("🚀 Initializing run engine and queue processor");
    let engine = Arc::new(RunEngine::new(
        Arc::clone(&definitions),
        Arc::clone(&executors),
    ));
    let processor = Arc::new(QueueProcessor::new(
        store.clone(),
        engine,
        config.queue.clone(),
    ));
    processor.spawn_workers();

    tracing::info!("⏰ Initializing schedule trigger service");
    let schedules = Arc::new(
        ScheduleTriggerService::new(
            Arc::clone(&definitions),
            store.clone(),
            config.queue.default_max_retries,
        )
        .await?,
    );

    let schedules_clone = Arc::clone(&schedules);
    tokio::spawn(async move {
        if let Err(e) = schedules_clone.start().await {
            tracing::error!("❌ Failed to start schedule trigger service: {}", e);
        }
    });

    let app_state = AppState {
        storage,
        definitions,
        schedules,
        store,
        processor,
        executors,
        queue_config: config.queue.clone(),
    };

    tracing::info!("📡 Creating HTTP router");
    let app = Router::new()
        .route("/healthz", get(health_check))
        .merge(create_workflow_routes())
        .merge(create_queue_routes())
        .merge(create_webhook_routes())
        .with_state(app_state);

    tracing::info!("✅ Application initialized successfully");

    Ok(app)
}

/// Start the HTTP server with the given configuration.
pub async fn start_server(config: Config) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = create_app(config).await?;

    tracing::info!("🌐 Listening on {}", addr);
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Liveness probe.
async fn health_check() -> &'static str {
    "ok"
}
