/// Task scheduler
///
/// The task queue behind `/api/tasks/*`. Tasks move `pending -> leased ->
/// completed`; a lease that runs past `timeout_at` makes the task claimable
/// again. Attempts are consumed at claim time, so a runner that dies without
/// reporting still uses up one of the task's attempts.

use crate::{
    catalog::ConfigStore,
    error::{Error, Result},
    runtime::types::{
        ClaimedTask, ResultOutcome, StatusSummary, SummaryTask, TaskRecord, TaskResult,
        WorkflowRun,
    },
    storage::{format_timestamp, parse_timestamp, Database},
    workflow::registry::GraphRegistry,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{sqlite::SqliteRow, Row, Sqlite, Transaction};
use std::{sync::Arc, time::Duration};
use uuid::Uuid;

/// Tunables for claiming and retries
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// How long a claimed task belongs to its runner
    pub lease: Duration,
    /// Attempts granted to every new task
    pub max_attempts: i64,
    /// Sleep before reporting "no work" to a polling runner
    pub idle_delay: Duration,
    /// Claim retries on lock conflicts before giving up
    pub claim_retries: u32,
    /// First retry delay; doubles on every retry
    pub retry_backoff: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(5 * 60),
            max_attempts: 3,
            idle_delay: Duration::from_secs(1),
            claim_retries: 5,
            retry_backoff: Duration::from_millis(10),
        }
    }
}

pub struct Scheduler {
    db: Database,
    store: ConfigStore,
    graphs: Arc<GraphRegistry>,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(
        db: Database,
        store: ConfigStore,
        graphs: Arc<GraphRegistry>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            db,
            store,
            graphs,
            settings,
        }
    }

    /// Start `workflow_id` from the latest config generation
    pub async fn start_workflow(
        &self,
        workflow_id: &str,
        input: Option<Map<String, Value>>,
    ) -> Result<WorkflowRun> {
        let hash = self.store.latest_hash().await?;
        self.start_workflow_in(&hash, workflow_id, input).await
    }

    /// Create a run in generation `config_hash` and schedule its start task
    pub async fn start_workflow_in(
        &self,
        config_hash: &str,
        workflow_id: &str,
        input: Option<Map<String, Value>>,
    ) -> Result<WorkflowRun> {
        let graph = self.graphs.get(config_hash, workflow_id).await?;
        let start = graph.resolve(&graph.start)?;

        let run = WorkflowRun {
            id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            config_hash: config_hash.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            success: None,
        };

        let mut tx = self.db.pool().begin().await?;
        sqlx::query(
            r#"
            INSERT INTO workflow_runs (id, workflow_id, config_hash, started_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.workflow_id)
        .bind(&run.config_hash)
        .bind(format_timestamp(run.started_at))
        .execute(&mut *tx)
        .await?;

        let task_input = merge_input(&start.with, input.as_ref());
        let task_id = self
            .insert_task(&mut tx, &run.id, &graph.start, &task_input)
            .await?;
        tx.commit().await?;

        tracing::info!(
            "🚀 Started workflow {} (run {}, first task {} = {})",
            workflow_id,
            run.id,
            graph.start,
            task_id
        );
        Ok(run)
    }

    /// Claim one runnable task, waiting `idle_delay` when there is none
    pub async fn claim_next(&self) -> Result<Option<ClaimedTask>> {
        let claimed = self.claim_at(Utc::now()).await?;
        if claimed.is_none() && !self.settings.idle_delay.is_zero() {
            tokio::time::sleep(self.settings.idle_delay).await;
        }
        Ok(claimed)
    }

    /// Claim one task eligible at `now`, retrying lock conflicts with backoff
    pub async fn claim_at(&self, now: DateTime<Utc>) -> Result<Option<ClaimedTask>> {
        let mut attempt = 0u32;
        loop {
            match self.try_claim(now).await {
                Err(e) if e.is_lock_conflict() && attempt < self.settings.claim_retries => {
                    let delay = self.settings.retry_backoff * 2u32.saturating_pow(attempt);
                    tracing::debug!("🔒 Claim hit a locked database, retry {} in {:?}", attempt + 1, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_lock_conflict() => {
                    tracing::error!("❌ Claim gave up after {} lock conflicts: {}", attempt, e);
                    return Err(e);
                }
                other => return other,
            }
        }
    }

    /// One claim transaction: lease stamp first, then hydration
    async fn try_claim(&self, now: DateTime<Utc>) -> Result<Option<ClaimedTask>> {
        let now_text = format_timestamp(now);
        let lease = chrono::Duration::from_std(self.settings.lease)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let timeout_at = now + lease;

        let mut tx = self.db.pool().begin().await?;

        let leased = sqlx::query(
            r#"
            UPDATE tasks
            SET started_at = ?, timeout_at = ?, attempts_left = attempts_left - 1
            WHERE id = (
                SELECT id FROM tasks
                WHERE completed_at IS NULL
                  AND attempts_left > 0
                  AND (started_at IS NULL OR timeout_at < ?)
                LIMIT 1
            )
            RETURNING id, workflow_run_id, workflow_task_id, input, attempts_left
            "#,
        )
        .bind(&now_text)
        .bind(format_timestamp(timeout_at))
        .bind(&now_text)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(leased) = leased else {
            tx.rollback().await?;
            return Ok(None);
        };

        let task_id: String = leased.try_get("id")?;
        let run_id: String = leased.try_get("workflow_run_id")?;
        let workflow_task_id: String = leased.try_get("workflow_task_id")?;
        let input: String = leased.try_get("input")?;
        let attempts_left: i64 = leased.try_get("attempts_left")?;

        let run = sqlx::query("SELECT workflow_id, config_hash FROM workflow_runs WHERE id = ?")
            .bind(&run_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound(format!("workflow run {}", run_id)))?;
        let workflow_id: String = run.try_get("workflow_id")?;
        let config_hash: String = run.try_get("config_hash")?;

        // Any failure from here on drops `tx`, which rolls the lease back.
        // A cache miss reads on this transaction's connection: other pool
        // connections may be queued behind our write lock.
        let graph = self.graphs.get_in(&mut *tx, &config_hash, &workflow_id).await?;
        let spec = graph.resolve(&workflow_task_id)?;
        let input = match serde_json::from_str::<Value>(&input)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        tx.commit().await?;

        tracing::info!(
            "📤 Leased task {} ({}/{}) until {}, {} attempts left",
            task_id,
            workflow_id,
            workflow_task_id,
            timeout_at,
            attempts_left
        );

        Ok(Some(ClaimedTask {
            id: task_id,
            workflow_run_id: run_id,
            workflow_task_id,
            image: spec.image.clone(),
            script: spec.script.clone(),
            env: spec.env.clone(),
            datasets: spec.with_datasets.clone(),
            input,
            timeout_at,
            attempts_left,
        }))
    }

    /// Record a runner's result and advance the owning run
    ///
    /// Completion is guarded by `completed_at IS NULL`: a repeated post for a
    /// completed task is acknowledged without scheduling anything.
    pub async fn record_result(&self, result: &TaskResult) -> Result<ResultOutcome> {
        let now = format_timestamp(Utc::now());
        let output = Value::Object(result.output.clone().unwrap_or_default());

        let mut tx = self.db.pool().begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE tasks
            SET completed_at = ?, success = ?, output = ?, stdout = ?, stderr = ?
            WHERE id = ? AND completed_at IS NULL
            "#,
        )
        .bind(&now)
        .bind(result.ok)
        .bind(output.to_string())
        .bind(&result.stdout)
        .bind(&result.stderr)
        .bind(&result.id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM tasks WHERE id = ?")
                .bind(&result.id)
                .fetch_optional(&mut *tx)
                .await?;
            tx.rollback().await?;
            return match exists {
                Some(_) => {
                    tracing::debug!("🔁 Task {} already completed, ignoring result", result.id);
                    Ok(ResultOutcome::AlreadyCompleted)
                }
                None => Err(Error::NotFound(format!("task {}", result.id))),
            };
        }

        let row = sqlx::query(
            r#"
            SELECT t.workflow_run_id, t.workflow_task_id, r.workflow_id, r.config_hash
            FROM tasks t JOIN workflow_runs r ON r.id = t.workflow_run_id
            WHERE t.id = ?
            "#,
        )
        .bind(&result.id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound(format!("workflow run of task {}", result.id)))?;
        let run_id: String = row.try_get("workflow_run_id")?;
        let workflow_task_id: String = row.try_get("workflow_task_id")?;
        let workflow_id: String = row.try_get("workflow_id")?;
        let config_hash: String = row.try_get("config_hash")?;

        if !result.ok {
            complete_run(&mut tx, &run_id, false, &now).await?;
            tx.commit().await?;
            tracing::warn!(
                "💥 Task {} ({}/{}) failed, run {} completed unsuccessfully",
                result.id,
                workflow_id,
                workflow_task_id,
                run_id
            );
            return Ok(ResultOutcome::RunCompleted { success: false });
        }

        let graph = self.graphs.get_in(&mut *tx, &config_hash, &workflow_id).await?;
        let outcome = match graph.next(&workflow_task_id)? {
            None => {
                complete_run(&mut tx, &run_id, true, &now).await?;
                ResultOutcome::RunCompleted { success: true }
            }
            Some(next) => {
                let spec = graph.resolve(next)?;
                let input = merge_input(&spec.with, result.output.as_ref());
                let task_id = self.insert_task(&mut tx, &run_id, next, &input).await?;
                ResultOutcome::Scheduled {
                    task_id,
                    workflow_task_id: next.to_string(),
                }
            }
        };
        tx.commit().await?;

        match &outcome {
            ResultOutcome::Scheduled {
                task_id,
                workflow_task_id: next,
            } => tracing::info!(
                "➡️ Task {} done, scheduled {} ({}) in run {}",
                workflow_task_id,
                next,
                task_id,
                run_id
            ),
            _ => tracing::info!("✅ Run {} of {} completed successfully", run_id, workflow_id),
        }
        Ok(outcome)
    }

    async fn insert_task(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        run_id: &str,
        workflow_task_id: &str,
        input: &Map<String, Value>,
    ) -> Result<String> {
        let task_id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO tasks (id, workflow_run_id, workflow_task_id, input, created_at, attempts_left)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task_id)
        .bind(run_id)
        .bind(workflow_task_id)
        .bind(serde_json::to_string(input)?)
        .bind(format_timestamp(Utc::now()))
        .bind(self.settings.max_attempts)
        .execute(&mut **tx)
        .await?;
        Ok(task_id)
    }

    /// Runs of a workflow, newest first
    pub async fn runs(&self, workflow_id: &str) -> Result<Vec<WorkflowRun>> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, config_hash, started_at, completed_at, success
            FROM workflow_runs WHERE workflow_id = ? ORDER BY started_at DESC
            "#,
        )
        .bind(workflow_id)
        .fetch_all(self.db.pool())
        .await?;
        rows.iter().map(run_from_row).collect()
    }

    pub async fn run(&self, run_id: &str) -> Result<WorkflowRun> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_id, config_hash, started_at, completed_at, success
            FROM workflow_runs WHERE id = ?
            "#,
        )
        .bind(run_id)
        .fetch_optional(self.db.pool())
        .await?
        .ok_or_else(|| Error::NotFound(format!("workflow run {}", run_id)))?;
        run_from_row(&row)
    }

    /// Tasks of a run in creation order
    pub async fn tasks(&self, run_id: &str) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_run_id, workflow_task_id, input, output, created_at, started_at,
                   timeout_at, completed_at, attempts_left, stdout, stderr, success
            FROM tasks WHERE workflow_run_id = ? ORDER BY created_at
            "#,
        )
        .bind(run_id)
        .fetch_all(self.db.pool())
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    pub async fn task(&self, task_id: &str) -> Result<TaskRecord> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_run_id, workflow_task_id, input, output, created_at, started_at,
                   timeout_at, completed_at, attempts_left, stdout, stderr, success
            FROM tasks WHERE id = ?
            "#,
        )
        .bind(task_id)
        .fetch_optional(self.db.pool())
        .await?
        .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))?;
        task_from_row(&row)
    }

    /// Totals for the latest generation plus recent task activity
    pub async fn status_summary(&self) -> Result<StatusSummary> {
        let hash = match self.store.latest_hash().await {
            Ok(hash) => hash,
            Err(Error::NotFound(_)) => String::new(),
            Err(e) => return Err(e),
        };

        let counts = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM data_connections WHERE config_hash = ?1) AS total_connections,
                (SELECT COUNT(*) FROM datasets WHERE config_hash = ?1) AS total_datasets,
                (SELECT COUNT(*) FROM workflows WHERE config_hash = ?1) AS total_workflows,
                (SELECT COUNT(*) FROM tasks WHERE completed_at IS NOT NULL) AS total_tasks_completed
            "#,
        )
        .bind(&hash)
        .fetch_one(self.db.pool())
        .await?;

        Ok(StatusSummary {
            total_connections: counts.try_get("total_connections")?,
            total_datasets: counts.try_get("total_datasets")?,
            total_workflows: counts.try_get("total_workflows")?,
            total_tasks_completed: counts.try_get("total_tasks_completed")?,
            recent_task_runs: self.recent_tasks(false).await?,
            recent_task_failures: self.recent_tasks(true).await?,
        })
    }

    async fn recent_tasks(&self, failures_only: bool) -> Result<Vec<SummaryTask>> {
        let filter = if failures_only { "WHERE t.success = 0" } else { "" };
        let sql = format!(
            r#"
            SELECT t.id, r.workflow_id, t.workflow_run_id, t.workflow_task_id,
                   t.created_at, t.started_at, t.completed_at, t.success
            FROM tasks t LEFT JOIN workflow_runs r ON r.id = t.workflow_run_id
            {}
            ORDER BY COALESCE(t.completed_at, t.started_at) DESC
            LIMIT 10
            "#,
            filter
        );
        let rows = sqlx::query(&sql).fetch_all(self.db.pool()).await?;
        rows.iter()
            .map(|row| {
                Ok(SummaryTask {
                    id: row.try_get("id")?,
                    workflow_id: row.try_get("workflow_id")?,
                    workflow_run_id: row.try_get("workflow_run_id")?,
                    workflow_task_id: row.try_get("workflow_task_id")?,
                    created_at: required_timestamp(row, "created_at")?,
                    started_at: optional_timestamp(row, "started_at")?,
                    completed_at: optional_timestamp(row, "completed_at")?,
                    success: row.try_get("success")?,
                })
            })
            .collect()
    }
}

/// Static `with` values overlaid by `overlay` (overlay keys win).
pub fn merge_input(
    with: &Map<String, Value>,
    overlay: Option<&Map<String, Value>>,
) -> Map<String, Value> {
    let mut merged = with.clone();
    if let Some(overlay) = overlay {
        for (key, value) in overlay {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

async fn complete_run(
    tx: &mut Transaction<'_, Sqlite>,
    run_id: &str,
    success: bool,
    now: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE workflow_runs SET completed_at = ?, success = ? WHERE id = ? AND completed_at IS NULL",
    )
    .bind(now)
    .bind(success)
    .bind(run_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn decode_error(column: &str, raw: &str) -> Error {
    Error::Storage(sqlx::Error::Decode(
        format!("invalid timestamp in {}: {}", column, raw).into(),
    ))
}

fn required_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let raw: String = row.try_get(column)?;
    parse_timestamp(&raw).ok_or_else(|| decode_error(column, &raw))
}

fn optional_timestamp(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|raw| parse_timestamp(&raw).ok_or_else(|| decode_error(column, &raw)))
        .transpose()
}

fn run_from_row(row: &SqliteRow) -> Result<WorkflowRun> {
    Ok(WorkflowRun {
        id: row.try_get("id")?,
        workflow_id: row.try_get("workflow_id")?,
        config_hash: row.try_get("config_hash")?,
        started_at: required_timestamp(row, "started_at")?,
        completed_at: optional_timestamp(row, "completed_at")?,
        success: row.try_get("success")?,
    })
}

fn task_from_row(row: &SqliteRow) -> Result<TaskRecord> {
    let input: String = row.try_get("input")?;
    let output: Option<String> = row.try_get("output")?;
    Ok(TaskRecord {
        id: row.try_get("id")?,
        workflow_run_id: row.try_get("workflow_run_id")?,
        workflow_task_id: row.try_get("workflow_task_id")?,
        input: serde_json::from_str(&input)?,
        output: output.map(|o| serde_json::from_str(&o)).transpose()?,
        created_at: required_timestamp(row, "created_at")?,
        started_at: optional_timestamp(row, "started_at")?,
        timeout_at: optional_timestamp(row, "timeout_at")?,
        completed_at: optional_timestamp(row, "completed_at")?,
        attempts_left: row.try_get("attempts_left")?,
        stdout: row.try_get("stdout")?,
        stderr: row.try_get("stderr")?,
        success: row.try_get("success")?,
    })
}
