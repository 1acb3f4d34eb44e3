use crate::SqliteSeenStore;
use replybot_core::{ItemId, SeenStore};
use std::env;
use std::path::PathBuf;

fn temp_db_path() -> PathBuf {
    env::temp_dir().join(format!("test_replybot_{}.db", uuid::Uuid::new_v4()))
}

async fn setup_test_db() -> (SqliteSeenStore, PathBuf) {
    let path = temp_db_path();
    let store = SqliteSeenStore::open(&path)
        .await
        .expect("Failed to open test database");
    (store, path)
}

#[tokio::test]
async fn test_database_connection_and_migrations() {
    let (store, path) = setup_test_db().await;
    assert_eq!(store.len().await.unwrap(), 0);
    assert_eq!(store.path(), path.as_path());

    // Migrations are idempotent
    store.run_migrations().await.unwrap();
}

#[tokio::test]
async fn test_record_and_contains() {
    let (store, _path) = setup_test_db().await;
    let replied = ItemId::comment("abc123");
    let skipped = ItemId::submission("abc123");

    assert!(!store.contains(&replied).await.unwrap());

    store.record(&replied, true).await.unwrap();
    store.record(&skipped, false).await.unwrap();

    assert!(store.contains(&replied).await.unwrap());
    assert!(store.contains(&skipped).await.unwrap());
    assert!(!store.contains(&ItemId::comment("other")).await.unwrap());

    assert_eq!(store.was_replied(&replied).await.unwrap(), Some(true));
    assert_eq!(store.was_replied(&skipped).await.unwrap(), Some(false));
    assert_eq!(store.was_replied(&ItemId::comment("other")).await.unwrap(), None);
    assert_eq!(store.replied_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_record_twice_keeps_first_entry() {
    let (store, _path) = setup_test_db().await;
    let id = ItemId::comment("dup");

    store.record(&id, true).await.unwrap();
    store.record(&id, false).await.unwrap();

    assert_eq!(store.len().await.unwrap(), 1);
    assert_eq!(store.was_replied(&id).await.unwrap(), Some(true));
}

#[tokio::test]
async fn test_seen_items_survive_reopen() {
    let (store, path) = setup_test_db().await;
    store.record(&ItemId::comment("kept"), true).await.unwrap();
    store.close().await;

    let reopened = SqliteSeenStore::open(&path).await.unwrap();
    assert!(reopened.contains(&ItemId::comment("kept")).await.unwrap());
    assert_eq!(reopened.len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_open_creates_parent_directories() {
    let dir = env::temp_dir().join(format!("replybot_nested_{}", uuid::Uuid::new_v4()));
    let path = dir.join("state").join("seen.db");

    let store = SqliteSeenStore::open(&path).await.unwrap();
    assert!(path.exists());
    store.close().await;
}
