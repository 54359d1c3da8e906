// Shared setup for the integration tests: a fresh data directory per test,
// an application state built the same way the server builds it, and a few
// canned config documents.

#![allow(dead_code)]

use std::{path::Path, time::Duration};

use taskjoin::{
    api::AppState,
    config::{
        Config, DatabaseConfig, RefreshConfig, SchedulerConfig, ServerConfig, SourceConfig,
        SourceKind,
    },
    definitions::ConfigBase,
    runtime::TaskResult,
    server::build_state,
};
use tempfile::TempDir;

/// Two-step chain used by most scheduler tests
pub const CHAIN: &str = r#"
workflows:
  - id: chain
    start: a
    tasks:
      a: { next: b, image: alpine, with: { mode: first, limit: 10 } }
      b: { image: alpine, with: { mode: second } }
"#;

/// Two csv sources joined on `id`, refreshed every minute, with one
/// workflow subscribed to the refresh
pub const JOINED: &str = r#"
data_connections:
  - { id: people_csv, type: csv, path: people.csv }
  - { id: labels_csv, type: csv, path: labels.csv }
datasets:
  - id: people_labels
    refresh: { interval: 1m }
    data_source: { id: people, data_connection: people_csv }
    joins:
      - data_source: { id: labels, data_connection: labels_csv }
        columns:
          - { left_column: id, right_column: id }
workflows:
  - id: report
    start: publish
    on: { dataset_refresh: [people_labels] }
    tasks:
      publish: { image: alpine, with_datasets: [people_labels] }
"#;

pub const PEOPLE_CSV: &str = "id,name\n1,x\n2,y\n";
pub const LABELS_CSV: &str = "id,label\n1,p\n3,q\n";

/// Explicit test configuration: no config source, no idle wait on polls
pub fn test_config(data_dir: &Path) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        database: DatabaseConfig {
            data_dir: data_dir.to_path_buf(),
        },
        scheduler: SchedulerConfig {
            lease: Duration::from_secs(5 * 60),
            max_attempts: 3,
            idle_delay: Duration::ZERO,
            claim_retries: 5,
            retry_backoff: Duration::from_millis(10),
        },
        refresh: RefreshConfig {
            tick: Duration::from_secs(60),
        },
        source: SourceConfig {
            kind: SourceKind::File,
            location: None,
        },
    }
}

/// Fresh data directory and application state with `yaml` loaded as the
/// latest generation (relative csv paths resolve inside the directory)
pub async fn state_with(yaml: &str) -> (TempDir, AppState) {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(&test_config(dir.path())).await.unwrap();
    if !yaml.is_empty() {
        state
            .store
            .load(yaml, &ConfigBase::Directory(dir.path().to_path_buf()))
            .await
            .unwrap();
    }
    (dir, state)
}

/// Same as `state_with(JOINED)` with both csv files written first
pub async fn joined_state() -> (TempDir, AppState) {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "people.csv", PEOPLE_CSV);
    write_csv(dir.path(), "labels.csv", LABELS_CSV);
    let state = build_state(&test_config(dir.path())).await.unwrap();
    state
        .store
        .load(JOINED, &ConfigBase::Directory(dir.path().to_path_buf()))
        .await
        .unwrap();
    (dir, state)
}

pub fn write_csv(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(name), content).unwrap();
}

pub fn result(id: &str, ok: bool, output: serde_json::Value) -> TaskResult {
    TaskResult {
        id: id.to_string(),
        ok,
        output: output.as_object().cloned(),
        stdout: String::new(),
        stderr: String::new(),
    }
}
