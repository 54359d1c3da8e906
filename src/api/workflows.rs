/// Workflow endpoints
///
/// Read-only projections of the latest config generation and of run state,
/// plus manual starts. Collections come back empty rather than as errors;
/// only single-resource lookups answer 404.

use crate::{
    api::{ApiError, ApiResponse, ApiResult, AppState},
    definitions::Workflow,
    error::Error,
    runtime::{TaskRecord, WorkflowRun},
};
use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::{get, post},
    Router,
};
use serde_json::{Map, Value};

pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", get(list_workflows))
        .route("/api/workflows/{id}", get(get_workflow))
        .route("/api/workflows/{id}/start", post(start_workflow))
        .route("/api/workflows/{id}/runs", get(list_runs))
        .route("/api/workflows/{id}/runs/{run_id}/tasks", get(list_run_tasks))
}

/// GET /api/workflows
async fn list_workflows(State(state): State<AppState>) -> ApiResult<Vec<Workflow>> {
    let workflows = match state.latest_hash().await? {
        Some(hash) => state.store.workflows(&hash).await?,
        None => Vec::new(),
    };
    Ok(ApiResponse(workflows))
}

/// GET /api/workflows/{id}
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Workflow> {
    let hash = state.store.latest_hash().await?;
    let workflow = state.store.workflow(&hash, &id).await?;
    Ok(ApiResponse(workflow))
}

/// POST /api/workflows/{id}/start
///
/// Optional body: initial input object, overlaid on the start task's `with`.
async fn start_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<WorkflowRun> {
    let input = parse_start_input(&body)?;
    let run = state.scheduler.start_workflow(&id, input).await?;
    tracing::info!("🔥 Workflow {} started via API (run {})", id, run.id);
    Ok(ApiResponse(run))
}

fn parse_start_input(body: &[u8]) -> Result<Option<Map<String, Value>>, ApiError> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(None);
    }
    match serde_json::from_slice::<Value>(body).map_err(|e| Error::Parse(e.to_string()))? {
        Value::Object(map) => Ok(Some(map)),
        Value::Null => Ok(None),
        _ => Err(ApiError(Error::Parse(
            "workflow input must be a JSON object".to_string(),
        ))),
    }
}

/// GET /api/workflows/{id}/runs
async fn list_runs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<WorkflowRun>> {
    let runs = state.scheduler.runs(&id).await?;
    Ok(ApiResponse(runs))
}

/// GET /api/workflows/{id}/runs/{run_id}/tasks
async fn list_run_tasks(
    State(state): State<AppState>,
    Path((_id, run_id)): Path<(String, String)>,
) -> ApiResult<Vec<TaskRecord>> {
    let tasks = state.scheduler.tasks(&run_id).await?;
    Ok(ApiResponse(tasks))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_input() {
        assert_eq!(parse_start_input(b"").unwrap(), None);
        assert_eq!(parse_start_input(b" null ").unwrap(), None);
        let input = parse_start_input(br#"{"limit": 5}"#).unwrap().unwrap();
        assert_eq!(input["limit"], 5);
        assert!(parse_start_input(b"[1]").is_err());
        assert!(parse_start_input(b"{").is_err());
    }
}
