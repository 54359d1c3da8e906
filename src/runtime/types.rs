/// Run-state records
///
/// Rows of `workflow_runs` / `tasks` as the API and tests see them, plus the
/// payloads exchanged with runners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One execution of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: String,
    pub workflow_id: String,
    pub config_hash: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// None while running; set exactly once
    pub success: Option<bool>,
}

/// Stored task row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub workflow_run_id: String,
    pub workflow_task_id: String,
    pub input: Value,
    pub output: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub timeout_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempts_left: i64,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub success: Option<bool>,
}

impl TaskRecord {
    pub fn state(&self) -> TaskState {
        if self.completed_at.is_some() {
            TaskState::Completed
        } else if self.started_at.is_some() {
            TaskState::Leased
        } else {
            TaskState::Pending
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Leased,
    Completed,
}

/// Work handed to a runner by a successful claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimedTask {
    pub id: String,
    pub workflow_run_id: String,
    pub workflow_task_id: String,
    pub image: String,
    pub script: String,
    pub env: BTreeMap<String, String>,
    /// Dataset ids the task depends on
    pub datasets: Vec<String>,
    /// `with` overlaid by the previous task's output
    pub input: Map<String, Value>,
    pub timeout_at: DateTime<Utc>,
    pub attempts_left: i64,
}

/// Result posted by a runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: String,
    pub ok: bool,
    #[serde(default)]
    pub output: Option<Map<String, Value>>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

/// What recording a result led to
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResultOutcome {
    /// The next task of the chain was scheduled
    Scheduled { task_id: String, workflow_task_id: String },
    /// The run reached a terminal state
    RunCompleted { success: bool },
    /// The task was already completed; nothing changed
    AlreadyCompleted,
}

/// Task row as listed in the status summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryTask {
    pub id: String,
    pub workflow_id: Option<String>,
    pub workflow_run_id: String,
    pub workflow_task_id: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub success: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSummary {
    pub total_connections: i64,
    pub total_datasets: i64,
    pub total_workflows: i64,
    pub total_tasks_completed: i64,
    pub recent_task_runs: Vec<SummaryTask>,
    pub recent_task_failures: Vec<SummaryTask>,
}
