/// Dataset endpoints
///
/// GET /api/datasets                   -> definitions of the latest generation
/// GET /api/datasets/{id}/preview      -> first rows (`?limit=N`, default 25)
/// GET /api/datasets/{id}/download     -> the raw SQLite artifact

use crate::{
    api::{ApiError, ApiResponse, ApiResult, AppState},
    definitions::Dataset,
};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio_util::io::ReaderStream;

pub fn create_dataset_routes() -> Router<AppState> {
    Router::new()
        .route("/api/datasets", get(list_datasets))
        .route("/api/datasets/{id}/preview", get(preview_dataset))
        .route("/api/datasets/{id}/download", get(download_dataset))
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub limit: Option<usize>,
}

async fn list_datasets(State(state): State<AppState>) -> ApiResult<Vec<Dataset>> {
    let datasets = match state.latest_hash().await? {
        Some(hash) => state.store.datasets(&hash).await?,
        None => Vec::new(),
    };
    Ok(ApiResponse(datasets))
}

async fn preview_dataset(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PreviewQuery>,
) -> ApiResult<Vec<Map<String, Value>>> {
    let rows = state.builder.preview(&id, query.limit).await?;
    Ok(ApiResponse(rows))
}

/// Streams the artifact; a concurrent rebuild swaps in a new file without
/// disturbing the open handle.
async fn download_dataset(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let path = state.builder.existing_artifact(&id)?;
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| ApiError(e.into()))?;
    let length = file
        .metadata()
        .await
        .map_err(|e| ApiError(e.into()))?
        .len();

    tracing::debug!("📦 Streaming dataset {} ({} bytes)", id, length);
    Ok((
        [
            (header::CONTENT_TYPE, "application/vnd.sqlite3".to_string()),
            (header::CONTENT_LENGTH, length.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.db\"", id),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}
