/// Server setup and initialization
///
/// Wires together all components: durable store, config catalog, graph cache,
/// task scheduler, dataset builder, refresh service and HTTP routes.
/// Provides the main application factory function for creating the Axum app.

use crate::{
    api::{create_api_routes, AppState},
    catalog::{ConfigStore, DataConnectionRegistry},
    config::Config,
    datasets::DatasetBuilder,
    runtime::{RefreshTrigger, Scheduler},
    storage::Database,
    workflow::GraphRegistry,
};
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Build every component and the shared handler state
///
/// Loads the configured config source once; the refresh service is not
/// started here.
pub async fn build_state(config: &Config) -> Result<AppState> {
    let data_dir = &config.database.data_dir;
    tracing::info!("📁 Ensuring data directory exists: {}", data_dir.display());
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

    let db = Database::open_in(data_dir)
        .await
        .context("Failed to open database")?;

    tracing::info!("📚 Initializing config catalog");
    let store = ConfigStore::new(db.clone());
    let connections = DataConnectionRegistry::new(store.clone());

    tracing::info!("📊 Initializing workflow graph cache and task scheduler");
    let graphs = Arc::new(GraphRegistry::new(store.clone()));
    let scheduler = Arc::new(Scheduler::new(
        db,
        store.clone(),
        graphs,
        config.scheduler.settings(),
    ));

    let builder = DatasetBuilder::new(store.clone(), connections.clone(), data_dir);

    let config_source = config.source.config_source();
    match &config_source {
        Some(source) => {
            tracing::info!("📥 Loading config from {}", source.describe());
            let loaded = store
                .reload(source)
                .await
                .with_context(|| format!("Failed to load config from {}", source.describe()))?;
            tracing::info!("✅ Config generation {} is latest", loaded.hash);
        }
        None => tracing::warn!("⚠️ TASKJOIN_CONFIG not set, starting without a config source"),
    }

    Ok(AppState {
        store,
        connections,
        scheduler,
        builder,
        config_source,
        refresh: None,
    })
}

/// Router for a prepared state
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        // Everything else lives under /api
        .merge(create_api_routes().with_state(state))
}

/// Create the main Axum application with all routes and background services
pub async fn create_app(config: Config) -> Result<Router> {
    let mut state = build_state(&config).await?;

    tracing::info!("⏰ Initializing dataset refresh service");
    let refresh = Arc::new(RefreshTrigger::new(
        state.store.clone(),
        state.builder.clone(),
        Arc::clone(&state.scheduler),
        config.refresh.tick,
    ));

    // Start the refresh service in background
    let refresh_clone = Arc::clone(&refresh);
    tokio::spawn(async move {
        if let Err(e) = refresh_clone.start().await {
            tracing::error!("❌ Failed to start dataset refresh service: {}", e);
        }
    });
    state.refresh = Some(refresh);

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = create_router(state);

    tracing::info!("✅ Application initialized successfully");
    Ok(app)
}

/// Start the HTTP server with the given configuration
///
/// Creates the application and starts the Axum server on the configured address and port.
pub async fn start_server(config: Config) -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting taskjoin server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
