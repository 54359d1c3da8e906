/// Operational endpoints
///
/// GET  /api/ping
/// GET  /api/data_connections   -> connections as written (no env expansion)
/// GET  /api/status/summary     -> totals and recent task activity
/// POST /api/config/reload      -> re-read the configured source

use crate::{
    api::{ApiResponse, ApiResult, AppState},
    catalog::LoadedConfig,
    definitions::DataConnection,
    error::Error,
    runtime::StatusSummary,
};
use axum::{
    extract::State,
    routing::{get, post},
    Router,
};

pub fn create_system_routes() -> Router<AppState> {
    Router::new()
        .route("/api/ping", get(ping))
        .route("/api/data_connections", get(list_data_connections))
        .route("/api/status/summary", get(status_summary))
        .route("/api/config/reload", post(reload_config))
}

async fn ping() -> ApiResult<&'static str> {
    Ok(ApiResponse("pong"))
}

async fn list_data_connections(State(state): State<AppState>) -> ApiResult<Vec<DataConnection>> {
    let connections = match state.latest_hash().await? {
        Some(hash) => state.connections.list(&hash).await?,
        None => Vec::new(),
    };
    Ok(ApiResponse(connections))
}

async fn status_summary(State(state): State<AppState>) -> ApiResult<StatusSummary> {
    Ok(ApiResponse(state.scheduler.status_summary().await?))
}

async fn reload_config(State(state): State<AppState>) -> ApiResult<LoadedConfig> {
    let source = state
        .config_source
        .as_ref()
        .ok_or_else(|| Error::NotFound("no config source configured".to_string()))?;

    tracing::info!("📥 Reloading config from {}", source.describe());
    let loaded = state.store.reload(source).await?;
    Ok(ApiResponse(loaded))
}
