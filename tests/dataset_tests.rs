// Dataset builds end to end plus the refresh service driving them.

mod common;

use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use taskjoin::{runtime::RefreshTrigger, Error};

use common::{joined_state, state_with, write_csv, LABELS_CSV, PEOPLE_CSV};

fn trigger(state: &taskjoin::api::AppState) -> RefreshTrigger {
    RefreshTrigger::new(
        state.store.clone(),
        state.builder.clone(),
        Arc::clone(&state.scheduler),
        std::time::Duration::from_secs(60),
    )
}

#[tokio::test]
async fn test_inner_join_keeps_matching_rows() {
    let (_dir, state) = joined_state().await;

    let report = state.builder.build("people_labels").await.unwrap();
    assert_eq!(report.rows, 1);
    assert_eq!(
        report.staged,
        vec![("people".to_string(), 2), ("labels".to_string(), 2)]
    );
    assert!(report.path.ends_with("datasets/people_labels.db"));

    let rows = state.builder.preview("people_labels", None).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], json!("1"));
    assert_eq!(rows[0]["name"], json!("x"));
    assert_eq!(rows[0]["label"], json!("p"));
}

#[tokio::test]
async fn test_left_join_keeps_unmatched_rows() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "people.csv", PEOPLE_CSV);
    write_csv(dir.path(), "labels.csv", LABELS_CSV);
    let state = taskjoin::server::build_state(&common::test_config(dir.path()))
        .await
        .unwrap();
    state
        .store
        .load(
            r#"
data_connections:
  - { id: people_csv, type: csv, path: people.csv }
  - { id: labels_csv, type: csv, path: labels.csv }
datasets:
  - id: everyone
    data_source: { id: people, data_connection: people_csv }
    joins:
      - type: left
        data_source: { id: labels, data_connection: labels_csv }
        columns:
          - { left_column: people.id, right_column: id }
"#,
            &taskjoin::definitions::ConfigBase::Directory(dir.path().to_path_buf()),
        )
        .await
        .unwrap();

    let report = state.builder.build("everyone").await.unwrap();
    assert_eq!(report.rows, 2);

    let rows = state.builder.preview("everyone", Some(10)).await.unwrap();
    let unmatched = rows.iter().find(|r| r["id"] == json!("2")).unwrap();
    assert_eq!(unmatched["name"], json!("y"));
    assert!(unmatched["label"].is_null());
}

#[tokio::test]
async fn test_preview_limit_and_missing_artifact() {
    let (_dir, state) = joined_state().await;

    assert!(matches!(
        state.builder.preview("people_labels", None).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        state.builder.preview("../taskjoin", None).await,
        Err(Error::NotFound(_))
    ));

    state.builder.build("people_labels").await.unwrap();
    assert!(state.builder.preview("people_labels", Some(0)).await.unwrap().is_empty());

    // Limits past i64::MAX clamp instead of wrapping negative
    let rows = state.builder.preview("people_labels", Some(usize::MAX)).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_failed_rebuild_keeps_previous_artifact() {
    let (dir, state) = joined_state().await;
    state.builder.build("people_labels").await.unwrap();

    write_csv(dir.path(), "labels.csv", "id,label\n1,p,extra\n");
    let err = state.builder.build("people_labels").await.unwrap_err();
    assert!(matches!(err, Error::MalformedSource { ref source_id, .. } if source_id == "labels"));

    let datasets = dir.path().join("datasets");
    assert!(!datasets.join("people_labels.db.building").exists());
    let rows = state.builder.preview("people_labels", None).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_missing_source_file_is_a_source_error() {
    let (dir, state) = joined_state().await;
    std::fs::remove_file(dir.path().join("people.csv")).unwrap();

    let err = state.builder.build("people_labels").await.unwrap_err();
    assert!(matches!(err, Error::Source { ref source_id, .. } if source_id == "people"));
    assert!(state.builder.existing_artifact("people_labels").is_err());
}

#[tokio::test]
async fn test_tick_refreshes_and_starts_subscribers() {
    let (_dir, state) = joined_state().await;
    let trigger = trigger(&state);
    let now = Utc::now();

    let report = trigger.tick(now).await;
    assert_eq!(report.refreshed, vec!["people_labels".to_string()]);
    assert_eq!(report.started_runs.len(), 1);
    assert_eq!(trigger.last_refreshed("people_labels"), Some(now));

    let task = state.scheduler.claim_next().await.unwrap().unwrap();
    assert_eq!(task.workflow_task_id, "publish");
    assert_eq!(task.datasets, vec!["people_labels".to_string()]);

    // Interval not elapsed yet
    let report = trigger.tick(now + Duration::seconds(30)).await;
    assert!(report.refreshed.is_empty());
    assert!(report.started_runs.is_empty());

    let report = trigger.tick(now + Duration::seconds(61)).await;
    assert_eq!(report.refreshed, vec!["people_labels".to_string()]);
    assert_eq!(state.scheduler.runs("report").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_tick_skips_build_in_flight() {
    let (_dir, state) = joined_state().await;
    let trigger = trigger(&state);

    let guard = trigger.try_begin("people_labels").unwrap();
    assert!(trigger.try_begin("people_labels").is_none());

    let report = trigger.tick(Utc::now()).await;
    assert_eq!(report.skipped_in_flight, vec!["people_labels".to_string()]);
    assert!(report.refreshed.is_empty());

    drop(guard);
    let report = trigger.tick(Utc::now()).await;
    assert_eq!(report.refreshed, vec!["people_labels".to_string()]);
}

#[tokio::test]
async fn test_failed_refresh_is_retried_next_tick() {
    let (dir, state) = joined_state().await;
    std::fs::remove_file(dir.path().join("labels.csv")).unwrap();
    let trigger = trigger(&state);

    let report = trigger.tick(Utc::now()).await;
    assert_eq!(report.failed, vec!["people_labels".to_string()]);
    assert!(report.started_runs.is_empty());
    assert_eq!(trigger.last_refreshed("people_labels"), None);

    write_csv(dir.path(), "labels.csv", LABELS_CSV);
    let report = trigger.tick(Utc::now()).await;
    assert_eq!(report.refreshed, vec!["people_labels".to_string()]);
}

#[tokio::test]
async fn test_tick_without_config_does_nothing() {
    let (_dir, state) = state_with("").await;
    let report = trigger(&state).tick(Utc::now()).await;
    assert_eq!(report, Default::default());
}
