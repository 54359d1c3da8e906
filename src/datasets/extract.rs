/// Source extraction into staging tables
///
/// Staging tables are untyped; every value lands as text or NULL. Rows go in
/// as batched multi-row inserts inside one transaction per source.

use crate::{
    datasets::sql::{create_staging_table, quote_ident},
    error::{Error, Result},
};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tokio_postgres::{NoTls, SimpleQueryMessage};

/// Bound parameters per insert statement
const PARAMS_PER_BATCH: usize = 900;

type Rows = Vec<Vec<Option<String>>>;

fn rows_per_batch(columns: usize) -> usize {
    (PARAMS_PER_BATCH / columns.max(1)).max(1)
}

/// Stage a CSV document: header row as columns, remaining rows as values
///
/// A row whose field count differs from the header aborts the build.
pub async fn stage_csv(pool: &SqlitePool, source_id: &str, data: &[u8]) -> Result<u64> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(data);
    let mut records = reader.records();

    let header = match records.next() {
        Some(record) => record.map_err(|e| malformed(source_id, e))?,
        None => return Err(malformed(source_id, "missing header row")),
    };
    let columns: Vec<String> = header.iter().map(|c| c.to_string()).collect();

    let mut tx = pool.begin().await?;
    sqlx::query(&create_staging_table(source_id, &columns))
        .execute(&mut *tx)
        .await?;

    let batch_size = rows_per_batch(columns.len());
    let mut batch: Rows = Vec::with_capacity(batch_size);
    let mut total = 0u64;

    for (index, record) in records.enumerate() {
        let record = record.map_err(|e| malformed(source_id, e))?;
        if record.len() != columns.len() {
            return Err(malformed(
                source_id,
                format!(
                    "inconsistent number of fields on line {}: expected {}, found {}",
                    index + 2,
                    columns.len(),
                    record.len()
                ),
            ));
        }
        batch.push(record.iter().map(|v| Some(v.to_string())).collect());
        if batch.len() == batch_size {
            total += insert_batch(&mut tx, source_id, &batch).await?;
            batch.clear();
        }
    }
    total += insert_batch(&mut tx, source_id, &batch).await?;

    tx.commit().await?;
    tracing::debug!("📥 Staged {} rows from csv source {}", total, source_id);
    Ok(total)
}

/// Stage the result of a query against a PostgreSQL connection
///
/// The simple-query protocol reports column names even for empty results
/// and hands every value over as text.
pub async fn stage_postgres(
    pool: &SqlitePool,
    source_id: &str,
    connection_string: &str,
    query: &str,
) -> Result<u64> {
    let (client, connection) = tokio_postgres::connect(connection_string, NoTls)
        .await
        .map_err(|e| Error::source_failure(source_id, e))?;

    let source = source_id.to_string();
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::warn!("⚠️ Postgres connection for {} closed with error: {}", source, e);
        }
    });

    let messages = client
        .simple_query(query)
        .await
        .map_err(|e| Error::source_failure(source_id, e))?;

    let mut columns: Option<Vec<String>> = None;
    let mut rows: Rows = Vec::new();
    for message in messages {
        match message {
            SimpleQueryMessage::RowDescription(description) => {
                if columns.is_none() {
                    columns = Some(description.iter().map(|c| c.name().to_string()).collect());
                }
            }
            SimpleQueryMessage::Row(row) => {
                if columns.is_none() {
                    columns = Some(row.columns().iter().map(|c| c.name().to_string()).collect());
                }
                rows.push((0..row.len()).map(|i| row.get(i).map(str::to_string)).collect());
            }
            _ => {}
        }
    }

    let columns = columns.ok_or_else(|| {
        Error::source_failure(source_id, "query returned no result set")
    })?;

    let mut tx = pool.begin().await?;
    sqlx::query(&create_staging_table(source_id, &columns))
        .execute(&mut *tx)
        .await?;

    let mut total = 0u64;
    for chunk in rows.chunks(rows_per_batch(columns.len())) {
        total += insert_batch(&mut tx, source_id, chunk).await?;
    }
    tx.commit().await?;

    tracing::debug!("📥 Staged {} rows from postgres source {}", total, source_id);
    Ok(total)
}

async fn insert_batch(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    table: &str,
    rows: &[Vec<Option<String>>],
) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }
    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("INSERT INTO {} ", quote_ident(table)));
    builder.push_values(rows, |mut values, row| {
        for value in row {
            values.push_bind(value.clone());
        }
    });
    let result = builder.build().execute(&mut **tx).await?;
    Ok(result.rows_affected())
}

fn malformed(source_id: &str, message: impl std::fmt::Display) -> Error {
    Error::MalformedSource {
        source_id: source_id.to_string(),
        message: message.to_string(),
    }
}
