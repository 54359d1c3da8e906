/// Config generation store
///
/// Append-only registry of parsed configuration documents. A generation is
/// identified by its content hash and never changes once stored; reloading
/// the same content only moves the "latest" marker (`loaded_at`).

use crate::{
    catalog::source::ConfigSource,
    definitions::{
        content_hash, parse_config, ConfigBase, ConfigDocument, ConnectionKind, DataConnection,
        Dataset, Workflow,
    },
    error::{Error, Result},
    storage::{format_timestamp, parse_timestamp, Database},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqliteRow, Executor, Row, Sqlite};

/// Outcome of a `load` call
#[derive(Debug, Clone, Serialize)]
pub struct LoadedConfig {
    pub hash: String,
    /// False when the generation was already stored
    pub created: bool,
    pub loaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    db: Database,
}

impl ConfigStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Parse, validate and persist a configuration document
    pub async fn load(&self, content: &str, base: &ConfigBase) -> Result<LoadedConfig> {
        let document = parse_config(content, base)?;
        self.load_document(&document).await
    }

    /// Re-read `source` and load whatever it currently holds
    pub async fn reload(&self, source: &ConfigSource) -> Result<LoadedConfig> {
        let (content, base) = source.fetch().await?;
        self.load(&content, &base).await
    }

    /// Persist an already validated document as a generation
    ///
    /// Runs in one transaction: the generation and its children are inserted
    /// only when the hash is unseen, then `loaded_at` is bumped either way.
    pub async fn load_document(&self, document: &ConfigDocument) -> Result<LoadedConfig> {
        let hash = content_hash(document)?;
        let config_json = serde_json::to_string(document)?;

        let mut tx = self.db.pool().begin().await?;

        // Keep loaded_at strictly increasing so "latest" is unambiguous
        let mut loaded_at = Utc::now();
        let previous: Option<String> = sqlx::query_scalar("SELECT MAX(loaded_at) FROM configs")
            .fetch_one(&mut *tx)
            .await?;
        if let Some(previous) = previous.as_deref().and_then(parse_timestamp) {
            if loaded_at <= previous {
                loaded_at = previous + chrono::Duration::nanoseconds(1);
            }
        }
        let loaded_at_text = format_timestamp(loaded_at);

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO configs (hash, loaded_at, config) VALUES (?, ?, ?)",
        )
        .bind(&hash)
        .bind(&loaded_at_text)
        .bind(&config_json)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        let created = inserted == 1;

        if created {
            for connection in &document.data_connections {
                sqlx::query(
                    r#"
                    INSERT INTO data_connections (config_hash, id, type, path, connection_string)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&hash)
                .bind(&connection.id)
                .bind(connection.kind.as_str())
                .bind(&connection.path)
                .bind(&connection.connection_string)
                .execute(&mut *tx)
                .await?;
            }

            for dataset in &document.datasets {
                sqlx::query("INSERT INTO datasets (config_hash, id, definition) VALUES (?, ?, ?)")
                    .bind(&hash)
                    .bind(&dataset.id)
                    .bind(serde_json::to_string(dataset)?)
                    .execute(&mut *tx)
                    .await?;
            }

            for workflow in &document.workflows {
                sqlx::query("INSERT INTO workflows (config_hash, id, definition) VALUES (?, ?, ?)")
                    .bind(&hash)
                    .bind(&workflow.id)
                    .bind(serde_json::to_string(workflow)?)
                    .execute(&mut *tx)
                    .await?;
            }
        } else {
            sqlx::query("UPDATE configs SET loaded_at = ? WHERE hash = ?")
                .bind(&loaded_at_text)
                .bind(&hash)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        if created {
            tracing::info!(
                "📦 Stored config generation {} ({} connections, {} datasets, {} workflows)",
                short_hash(&hash),
                document.data_connections.len(),
                document.datasets.len(),
                document.workflows.len()
            );
        } else {
            tracing::info!("♻️ Config generation {} reloaded unchanged", short_hash(&hash));
        }

        Ok(LoadedConfig {
            hash,
            created,
            loaded_at,
        })
    }

    /// Hash of the most recently loaded generation
    pub async fn latest_hash(&self) -> Result<String> {
        let hash: Option<String> =
            sqlx::query_scalar("SELECT hash FROM configs ORDER BY loaded_at DESC LIMIT 1")
                .fetch_optional(self.db.pool())
                .await?;
        hash.ok_or_else(|| Error::NotFound("no configuration loaded".to_string()))
    }

    pub async fn config_document(&self, hash: &str) -> Result<ConfigDocument> {
        let config: Option<String> = sqlx::query_scalar("SELECT config FROM configs WHERE hash = ?")
            .bind(hash)
            .fetch_optional(self.db.pool())
            .await?;
        let config =
            config.ok_or_else(|| Error::NotFound(format!("config generation {}", hash)))?;
        Ok(serde_json::from_str(&config)?)
    }

    pub async fn workflow(&self, hash: &str, id: &str) -> Result<Workflow> {
        read_workflow(self.db.pool(), hash, id).await
    }

    pub async fn workflows(&self, hash: &str) -> Result<Vec<Workflow>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT definition FROM workflows WHERE config_hash = ? ORDER BY id",
        )
        .bind(hash)
        .fetch_all(self.db.pool())
        .await?;
        rows.iter()
            .map(|definition| Ok(serde_json::from_str(definition)?))
            .collect()
    }

    pub async fn dataset(&self, hash: &str, id: &str) -> Result<Dataset> {
        let definition: Option<String> = sqlx::query_scalar(
            "SELECT definition FROM datasets WHERE config_hash = ? AND id = ?",
        )
        .bind(hash)
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;
        let definition = definition.ok_or_else(|| Error::NotFound(format!("dataset {}", id)))?;
        Ok(serde_json::from_str(&definition)?)
    }

    pub async fn datasets(&self, hash: &str) -> Result<Vec<Dataset>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT definition FROM datasets WHERE config_hash = ? ORDER BY id",
        )
        .bind(hash)
        .fetch_all(self.db.pool())
        .await?;
        rows.iter()
            .map(|definition| Ok(serde_json::from_str(definition)?))
            .collect()
    }

    /// Stored connections with values exactly as written in the config
    pub async fn data_connections(&self, hash: &str) -> Result<Vec<DataConnection>> {
        let rows = sqlx::query(
            r#"
            SELECT id, type, path, connection_string
            FROM data_connections WHERE config_hash = ? ORDER BY id
            "#,
        )
        .bind(hash)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(connection_from_row).collect()
    }

    pub async fn data_connection(&self, hash: &str, id: &str) -> Result<DataConnection> {
        let row = sqlx::query(
            r#"
            SELECT id, type, path, connection_string
            FROM data_connections WHERE config_hash = ? AND id = ?
            "#,
        )
        .bind(hash)
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?
        .ok_or_else(|| Error::NotFound(format!("data connection {}", id)))?;

        connection_from_row(&row)
    }
}

/// Workflow `id` of generation `hash`, read through any executor
///
/// Lets callers inside a transaction read on their own connection.
pub(crate) async fn read_workflow<'e, E>(executor: E, hash: &str, id: &str) -> Result<Workflow>
where
    E: Executor<'e, Database = Sqlite>,
{
    let definition: Option<String> =
        sqlx::query_scalar("SELECT definition FROM workflows WHERE config_hash = ? AND id = ?")
            .bind(hash)
            .bind(id)
            .fetch_optional(executor)
            .await?;
    let definition = definition.ok_or_else(|| Error::NotFound(format!("workflow {}", id)))?;
    Ok(serde_json::from_str(&definition)?)
}

fn connection_from_row(row: &SqliteRow) -> Result<DataConnection> {
    let kind: String = row.try_get("type")?;
    Ok(DataConnection {
        id: row.try_get("id")?,
        kind: ConnectionKind::parse(&kind),
        path: row.try_get("path")?,
        connection_string: row.try_get("connection_string")?,
    })
}

pub(crate) fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}
