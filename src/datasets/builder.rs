/// Dataset builder
///
/// Materializes a dataset into `<data_dir>/datasets/<id>.db`. The build
/// writes `<id>.db.building` and renames it over the previous artifact only
/// once every source is staged and the join succeeded, so a failed refresh
/// leaves the last good artifact in place.

use crate::{
    catalog::{source::fetch_remote, ConfigStore, DataConnectionRegistry},
    datasets::{
        extract::{stage_csv, stage_postgres},
        sql::{materialize_query, quote_ident},
    },
    definitions::{parser::is_url, types::DataSource, validator::is_valid_id, ConnectionKind, Dataset},
    error::{Error, Result},
    storage::scratch,
};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::{sqlite::SqliteRow, Column, Row, SqlitePool, TypeInfo, ValueRef};
use std::path::{Path, PathBuf};

/// Rows returned by `preview` when no limit is given
pub const DEFAULT_PREVIEW_LIMIT: usize = 25;

/// Summary of a finished build
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub dataset_id: String,
    pub config_hash: String,
    /// Staged row count per source, primary first
    pub staged: Vec<(String, u64)>,
    /// Rows in the materialized table
    pub rows: i64,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DatasetBuilder {
    store: ConfigStore,
    connections: DataConnectionRegistry,
    datasets_dir: PathBuf,
}

impl DatasetBuilder {
    pub fn new(store: ConfigStore, connections: DataConnectionRegistry, data_dir: &Path) -> Self {
        Self {
            store,
            connections,
            datasets_dir: data_dir.join("datasets"),
        }
    }

    /// Path of the published artifact for `dataset_id`
    pub fn artifact_path(&self, dataset_id: &str) -> PathBuf {
        self.datasets_dir.join(format!("{}.db", dataset_id))
    }

    /// Existing artifact for `dataset_id`, `NotFound` otherwise
    pub fn existing_artifact(&self, dataset_id: &str) -> Result<PathBuf> {
        let path = self.artifact_path(dataset_id);
        if is_valid_id(dataset_id) && path.is_file() {
            Ok(path)
        } else {
            Err(Error::NotFound(format!("materialized dataset {}", dataset_id)))
        }
    }

    /// Rebuild `dataset_id` from the latest config generation
    pub async fn build(&self, dataset_id: &str) -> Result<BuildReport> {
        let hash = self.store.latest_hash().await?;
        let dataset = self.store.dataset(&hash, dataset_id).await?;
        self.build_in(&hash, &dataset).await
    }

    /// Rebuild `dataset` with the connections of generation `hash`
    pub async fn build_in(&self, hash: &str, dataset: &Dataset) -> Result<BuildReport> {
        tokio::fs::create_dir_all(&self.datasets_dir).await?;

        let target = self.artifact_path(&dataset.id);
        let building = self.datasets_dir.join(format!("{}.db.building", dataset.id));
        if tokio::fs::try_exists(&building).await? {
            tokio::fs::remove_file(&building).await?;
        }

        tracing::info!("🏗️ Building dataset {}", dataset.id);

        let pool = scratch::open_for_build(&building).await?;
        let result = self.populate(&pool, hash, dataset).await;
        pool.close().await;

        match result {
            Ok((staged, rows)) => {
                tokio::fs::rename(&building, &target).await?;
                tracing::info!("✅ Dataset {} materialized with {} rows", dataset.id, rows);
                Ok(BuildReport {
                    dataset_id: dataset.id.clone(),
                    config_hash: hash.to_string(),
                    staged,
                    rows,
                    path: target,
                })
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&building).await {
                    tracing::warn!("⚠️ Could not remove {}: {}", building.display(), cleanup);
                }
                tracing::error!("❌ Dataset {} build failed [{}]: {}", dataset.id, e.code(), e);
                Err(e)
            }
        }
    }

    async fn populate(
        &self,
        pool: &SqlitePool,
        hash: &str,
        dataset: &Dataset,
    ) -> Result<(Vec<(String, u64)>, i64)> {
        let mut staged = Vec::new();
        for source in dataset.sources() {
            tracing::debug!("🔎 Extracting source {} for {}", source.id, dataset.id);
            let count = self.stage_source(pool, hash, source).await?;
            staged.push((source.id.clone(), count));
        }

        sqlx::query(&materialize_query(dataset)).execute(pool).await?;

        let rows: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {}",
            quote_ident(&dataset.id)
        ))
        .fetch_one(pool)
        .await?;
        Ok((staged, rows))
    }

    async fn stage_source(&self, pool: &SqlitePool, hash: &str, source: &DataSource) -> Result<u64> {
        let connection = self.connections.resolve(hash, &source.data_connection).await?;
        match connection.kind {
            ConnectionKind::Csv => {
                let data = if is_url(&connection.path) {
                    fetch_remote(&connection.path)
                        .await
                        .map_err(|e| Error::source_failure(&source.id, e))?
                } else {
                    tokio::fs::read(&connection.path)
                        .await
                        .map_err(|e| Error::source_failure(&source.id, format!("{}: {}", connection.path, e)))?
                };
                stage_csv(pool, &source.id, &data).await
            }
            ConnectionKind::Postgres => {
                stage_postgres(pool, &source.id, &connection.connection_string, &source.query).await
            }
            ConnectionKind::Unsupported => Err(Error::Validation(format!(
                "data connection '{}' has an unsupported type",
                connection.id
            ))),
        }
    }

    /// First `limit` rows of the materialized table (25 by default)
    pub async fn preview(
        &self,
        dataset_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Map<String, Value>>> {
        let path = self.existing_artifact(dataset_id)?;
        let limit = i64::try_from(limit.unwrap_or(DEFAULT_PREVIEW_LIMIT)).unwrap_or(i64::MAX);

        let pool = scratch::open_read_only(&path).await?;
        let rows = sqlx::query(&format!("SELECT * FROM {} LIMIT ?", quote_ident(dataset_id)))
            .bind(limit)
            .fetch_all(&pool)
            .await;
        pool.close().await;

        rows?.iter().map(row_to_object).collect()
    }
}

fn row_to_object(row: &SqliteRow) -> Result<Map<String, Value>> {
    let mut object = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        object.insert(column.name().to_string(), cell_value(row, index)?);
    }
    Ok(object)
}

fn cell_value(row: &SqliteRow, index: usize) -> Result<Value> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let kind = raw.type_info().name().to_string();
    Ok(match kind.as_str() {
        "INTEGER" => Value::from(row.try_get_unchecked::<i64, _>(index)?),
        "REAL" => Value::from(row.try_get_unchecked::<f64, _>(index)?),
        "BLOB" => Value::String(format!(
            "<{} bytes>",
            row.try_get_unchecked::<Vec<u8>, _>(index)?.len()
        )),
        _ => Value::String(row.try_get_unchecked::<String, _>(index)?),
    })
}
