/// Dataset Materialization
///
/// Extracts every source of a dataset into a scratch SQLite store, joins them
/// into one table and publishes the file for download:
/// - `builder`: DatasetBuilder (build, preview, artifact paths)
/// - `extract`: csv / postgres staging
/// - `sql`: identifier quoting and the join statement

pub mod builder;

pub mod extract;

pub mod sql;

pub use builder::{BuildReport, DatasetBuilder, DEFAULT_PREVIEW_LIMIT};
