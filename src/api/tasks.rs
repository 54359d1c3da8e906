/// Task queue endpoints used by runners
///
/// GET  /api/tasks/poll    -> a leased task, or `null` when idle
/// POST /api/tasks/result  -> record the outcome and advance the run

use crate::{
    api::{ApiError, ApiResponse, ApiResult, AppState},
    error::Error,
    runtime::{ClaimedTask, ResultOutcome, TaskResult},
};
use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
    routing::{get, post},
    Router,
};

pub fn create_task_routes() -> Router<AppState> {
    Router::new()
        .route("/api/tasks/poll", get(poll_task))
        .route("/api/tasks/result", post(post_result))
}

/// Long-poll style claim; idles briefly before answering `null`
async fn poll_task(State(state): State<AppState>) -> ApiResult<Option<ClaimedTask>> {
    let task = state.scheduler.claim_next().await?;
    Ok(ApiResponse(task))
}

/// Body: `{ "id": "...", "ok": true, "output": {...}, "stdout": "...", "stderr": "..." }`
///
/// Output truncation is left to the runner.
async fn post_result(
    State(state): State<AppState>,
    body: Result<Json<TaskResult>, JsonRejection>,
) -> ApiResult<ResultOutcome> {
    let Json(result) = body.map_err(|e| ApiError(Error::Parse(e.body_text())))?;
    let outcome = state.scheduler.record_result(&result).await?;
    Ok(ApiResponse(outcome))
}
