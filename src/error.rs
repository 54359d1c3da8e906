/// Error taxonomy for the taskjoin core
///
/// Every component returns `taskjoin::Result`. The HTTP layer maps each variant
/// onto a status code; the server wiring wraps these in `anyhow` with context.

use thiserror::Error;

/// Result alias used across the core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed configuration document (rejected before storage)
    #[error("parse error: {0}")]
    Parse(String),

    /// Structurally invalid configuration (duplicate ids, missing fields, ...)
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown id for a single-resource lookup
    #[error("not found: {0}")]
    NotFound(String),

    /// A workflow refers to a task id its task map does not contain
    #[error("unknown task `{task}` in workflow `{workflow}`")]
    UnknownTask { workflow: String, task: String },

    /// Durable store failure
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Flat-file row/header mismatch; aborts the current dataset build
    #[error("malformed source `{source_id}`: {message}")]
    MalformedSource { source_id: String, message: String },

    /// Extraction failed talking to a data source (file, database, remote)
    #[error("data source `{source_id}` failed: {message}")]
    Source { source_id: String, message: String },

    /// Fetching a remote configuration failed
    #[error("remote fetch failed: {0}")]
    Remote(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Short machine-readable code, logged next to the message.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Parse(_) => "PARSE_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::UnknownTask { .. } => "UNKNOWN_TASK",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::MalformedSource { .. } => "MALFORMED_SOURCE",
            Error::Source { .. } => "SOURCE_ERROR",
            Error::Remote(_) => "REMOTE_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Json(_) => "JSON_ERROR",
        }
    }

    pub(crate) fn source_failure(source_id: &str, err: impl std::fmt::Display) -> Self {
        Error::Source {
            source_id: source_id.to_string(),
            message: err.to_string(),
        }
    }

    /// True when the durable store rejected the call because another writer
    /// holds the lock (SQLITE_BUSY / SQLITE_LOCKED and their extended codes).
    pub fn is_lock_conflict(&self) -> bool {
        match self {
            Error::Storage(e) => is_lock_conflict(e),
            _ => false,
        }
    }
}

/// Lock-conflict detection on raw sqlx errors.
pub fn is_lock_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            let primary = db
                .code()
                .and_then(|c| c.parse::<i32>().ok())
                .map(|c| c & 0xff);
            matches!(primary, Some(5) | Some(6)) || db.message().contains("database is locked")
        }
        _ => false,
    }
}
