/// Storage Layer
///
/// - `database`: the durable store (configs, runs, tasks)
/// - `scratch`: per-dataset bulk-load stores

pub mod database;
pub mod scratch;

pub use database::{format_timestamp, parse_timestamp, Database};
