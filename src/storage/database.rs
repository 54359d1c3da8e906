/// Durable store for config generations, runs and tasks
///
/// One SQLite file (`<data_dir>/taskjoin.db`) is the single source of truth.
/// WAL lets readers proceed while a claim or result write is in progress; the
/// busy timeout makes competing writers queue instead of failing outright.

use crate::error::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Fixed-width UTC timestamp format; sorts lexicographically in time order.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.9fZ";

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Shared handle to the durable store
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) `<data_dir>/taskjoin.db`
    pub async fn open_in(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Self::open(&data_dir.join("taskjoin.db")).await
    }

    /// Open the store at `path` and make sure the schema exists
    pub async fn open(path: &Path) -> Result<Self> {
        Self::open_with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT).await
    }

    /// Like `open`, with how long a statement waits on another writer's lock
    /// before failing with `SQLITE_BUSY`
    pub async fn open_with_busy_timeout(path: &Path, busy_timeout: Duration) -> Result<Self> {
        tracing::info!("🗄️ Opening database: {}", path.display());

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;

        tracing::info!("✅ Database ready: {}", path.display());
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Create every table and index used by the server
    async fn init_schema(&self) -> Result<()> {
        // Config generations, keyed by content hash
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS configs (
                hash TEXT PRIMARY KEY,
                loaded_at TEXT NOT NULL,
                config JSON NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                config_hash TEXT NOT NULL,
                id TEXT NOT NULL,
                definition JSON NOT NULL,
                PRIMARY KEY (config_hash, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS data_connections (
                config_hash TEXT NOT NULL,
                id TEXT NOT NULL,
                type TEXT NOT NULL,
                path TEXT NOT NULL DEFAULT '',
                connection_string TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (config_hash, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS datasets (
                config_hash TEXT NOT NULL,
                id TEXT NOT NULL,
                definition JSON NOT NULL,
                PRIMARY KEY (config_hash, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Run state
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_runs (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                config_hash TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                success INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                workflow_run_id TEXT NOT NULL,
                workflow_task_id TEXT NOT NULL,
                input JSON NOT NULL,
                output JSON,
                created_at TEXT NOT NULL,
                started_at TEXT,
                timeout_at TEXT,
                completed_at TEXT,
                attempts_left INTEGER NOT NULL DEFAULT 3,
                stdout TEXT,
                stderr TEXT,
                success INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_configs_loaded_at ON configs(loaded_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_workflow ON workflow_runs(workflow_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_run ON tasks(workflow_run_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tasks_claimable ON tasks(completed_at, attempts_left)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_roundtrip_and_ordering() {
        let earlier = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let later = earlier + chrono::Duration::nanoseconds(1);

        let a = format_timestamp(earlier);
        let b = format_timestamp(later);
        assert_eq!(a, "2024-01-02T03:04:05.000000000Z");
        assert!(a < b);
        assert_eq!(parse_timestamp(&b), Some(later));
    }

    #[tokio::test]
    async fn test_open_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in(dir.path()).await.unwrap();

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(db.pool())
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        for table in [
            "configs",
            "data_connections",
            "datasets",
            "tasks",
            "workflow_runs",
            "workflows",
        ] {
            assert!(names.contains(&table), "missing table {}", table);
        }

        // Reopening is a no-op on an existing schema
        db.close().await;
        Database::open_in(dir.path()).await.unwrap();
    }
}
