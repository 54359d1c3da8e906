// Config generations: idempotent reloads, per-generation scoping and
// rejection of invalid documents before anything is stored.

mod common;

use taskjoin::{definitions::ConfigBase, storage::Database, Error};

use common::{state_with, CHAIN, JOINED};

async fn count(db: &Database, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(db.pool())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_identical_reload_only_moves_latest() {
    let (dir, state) = state_with("").await;
    let base = ConfigBase::Directory(dir.path().to_path_buf());

    let first = state.store.load(JOINED, &base).await.unwrap();
    let second = state.store.load(JOINED, &base).await.unwrap();
    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.hash, second.hash);
    assert!(second.loaded_at > first.loaded_at);

    let db = Database::open_in(dir.path()).await.unwrap();
    assert_eq!(count(&db, "configs").await, 1);
    assert_eq!(count(&db, "workflows").await, 1);
    assert_eq!(count(&db, "datasets").await, 1);
    assert_eq!(count(&db, "data_connections").await, 2);
}

#[tokio::test]
async fn test_latest_follows_most_recent_load() {
    let (dir, state) = state_with("").await;
    let base = ConfigBase::Directory(dir.path().to_path_buf());

    let joined = state.store.load(JOINED, &base).await.unwrap();
    let chain = state.store.load(CHAIN, &base).await.unwrap();
    assert_ne!(joined.hash, chain.hash);
    assert_eq!(state.store.latest_hash().await.unwrap(), chain.hash);

    // Old generations stay readable by hash
    assert_eq!(state.store.datasets(&joined.hash).await.unwrap().len(), 1);
    assert!(state.store.datasets(&chain.hash).await.unwrap().is_empty());

    state.store.load(JOINED, &base).await.unwrap();
    assert_eq!(state.store.latest_hash().await.unwrap(), joined.hash);
}

#[tokio::test]
async fn test_connections_are_scoped_to_their_generation() {
    let (dir, state) = state_with("").await;
    let base = ConfigBase::Directory(dir.path().to_path_buf());

    let old = state
        .store
        .load(
            "data_connections:\n  - { id: warehouse, type: postgres, connection_string: postgres://old }\n",
            &base,
        )
        .await
        .unwrap();
    let new = state
        .store
        .load(
            "data_connections:\n  - { id: warehouse, type: postgres, connection_string: postgres://new }\n",
            &base,
        )
        .await
        .unwrap();

    let resolved = state.connections.resolve(&old.hash, "warehouse").await.unwrap();
    assert_eq!(resolved.connection_string, "postgres://old");
    let resolved = state.connections.resolve(&new.hash, "warehouse").await.unwrap();
    assert_eq!(resolved.connection_string, "postgres://new");

    assert!(matches!(
        state.connections.resolve(&new.hash, "missing").await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_connection_values_expand_from_environment() {
    std::env::set_var("TASKJOIN_IT_WAREHOUSE_URL", "postgres://from-env/db");
    let (_dir, state) = state_with(
        "data_connections:\n  - { id: warehouse, type: postgres, connection_string: $TASKJOIN_IT_WAREHOUSE_URL }\n",
    )
    .await;
    let hash = state.store.latest_hash().await.unwrap();

    let resolved = state.connections.resolve(&hash, "warehouse").await.unwrap();
    assert_eq!(resolved.connection_string, "postgres://from-env/db");

    let listed = state.connections.list(&hash).await.unwrap();
    assert_eq!(listed[0].connection_string, "$TASKJOIN_IT_WAREHOUSE_URL");
}

#[tokio::test]
async fn test_invalid_document_is_not_stored() {
    let (dir, state) = state_with(CHAIN).await;
    let base = ConfigBase::Directory(dir.path().to_path_buf());
    let before = state.store.latest_hash().await.unwrap();

    let cyclic = r#"
workflows:
  - id: loop
    start: a
    tasks:
      a: { next: b, image: alpine }
      b: { next: a, image: alpine }
"#;
    assert!(matches!(
        state.store.load(cyclic, &base).await,
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        state.store.load("workflows: [", &base).await,
        Err(Error::Parse(_))
    ));

    assert_eq!(state.store.latest_hash().await.unwrap(), before);
}
