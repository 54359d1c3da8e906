/// HTTP API Layer
///
/// REST endpoints for runners and operators. Every route lives under `/api`
/// and answers with the JSON envelope `{ok, error?, response?}`:
/// - Task polling and result reporting
/// - Workflow listing, starting and run inspection
/// - Dataset listing, preview and download
/// - Connections, status summary and config reload

use crate::{
    catalog::{ConfigSource, ConfigStore, DataConnectionRegistry},
    datasets::DatasetBuilder,
    error::Error,
    runtime::{RefreshTrigger, Scheduler},
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Router,
};
use serde::Serialize;
use std::sync::Arc;

// Runner-facing task queue endpoints
pub mod tasks;

// Workflow definitions, starts and run projections
pub mod workflows;

// Dataset definitions, previews and artifact downloads
pub mod datasets;

// Ping, connections, status summary and config reload
pub mod system;

/// Shared resources handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub store: ConfigStore,
    pub connections: DataConnectionRegistry,
    pub scheduler: Arc<Scheduler>,
    pub builder: DatasetBuilder,
    /// Where `/api/config/reload` reads from; `None` disables reloads
    pub config_source: Option<ConfigSource>,
    /// Running refresh service, kept alive for the lifetime of the router
    pub refresh: Option<Arc<RefreshTrigger>>,
}

impl AppState {
    /// Latest config hash, or `None` when nothing has been loaded yet
    pub(crate) async fn latest_hash(&self) -> crate::Result<Option<String>> {
        match self.store.latest_hash().await {
            Ok(hash) => Ok(Some(hash)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// All `/api` routes
pub fn create_api_routes() -> Router<AppState> {
    Router::new()
        .merge(tasks::create_task_routes())
        .merge(workflows::create_workflow_routes())
        .merge(datasets::create_dataset_routes())
        .merge(system::create_system_routes())
}

#[derive(Serialize)]
struct Success<T> {
    ok: bool,
    response: T,
}

#[derive(Serialize)]
struct Failure {
    ok: bool,
    error: String,
}

/// Successful envelope: `{"ok": true, "response": ...}`
pub struct ApiResponse<T>(pub T);

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(Success {
            ok: true,
            response: self.0,
        })
        .into_response()
    }
}

/// Failed envelope: `{"ok": false, "error": "..."}` with a mapped status
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Parse(_) | Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::MalformedSource { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Source { .. } | Error::Remote(_) => StatusCode::BAD_GATEWAY,
            Error::UnknownTask { .. } | Error::Storage(_) | Error::Io(_) | Error::Json(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("❌ [{}] {}", self.0.code(), self.0);
        } else {
            tracing::debug!("↩️ [{}] {}", self.0.code(), self.0);
        }
        (
            status,
            Json(Failure {
                ok: false,
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

pub type ApiResult<T> = std::result::Result<ApiResponse<T>, ApiError>;
