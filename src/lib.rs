/// taskjoin: workflow orchestration over joined datasets
///
/// This library provides a task queue that chains container tasks into linear
/// workflows, a content-hashed config catalog, and an ETL engine that
/// materializes joined datasets from csv files and PostgreSQL queries.

// Core configuration and setup
pub mod config;

// Error taxonomy shared by every component
pub mod error;

// Durable store and per-dataset scratch stores
pub mod storage;

// Config document types, parsing, validation and hashing
pub mod definitions;

// Content-hashed config generations and connection resolution
pub mod catalog;

// Linear workflow graphs and their cache
pub mod workflow;

// Task scheduler and dataset refresh service
pub mod runtime;

// Dataset extraction, joins and previews
pub mod datasets;

// HTTP API layer - task queue, workflows, datasets, status
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{Error, Result};
pub use runtime::{RefreshTrigger, Scheduler};
pub use server::start_server;
