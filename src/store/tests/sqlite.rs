use crate::store::{PersistedStore, SqliteStore};
use tempfile::tempdir;

#[tokio::test]
async fn test_get_missing_key_returns_none() {
    let dir = tempdir().unwrap();
    let store = SqliteStore::new(&dir.path().join("state.db")).await.unwrap();

    assert_eq!(store.get("fetchData").await.unwrap(), None);

    store.close().await;
}

#[tokio::test]
async fn test_set_replaces_whole_value() {
    let dir = tempdir().unwrap();
    let store = SqliteStore::new(&dir.path().join("state.db")).await.unwrap();

    store.set("fetchData", b"first".to_vec()).await.unwrap();
    store.set("fetchData", b"second".to_vec()).await.unwrap();
    assert_eq!(
        store.get("fetchData").await.unwrap(),
        Some(b"second".to_vec())
    );

    store.remove("fetchData").await.unwrap();
    assert_eq!(store.get("fetchData").await.unwrap(), None);

    // Removing an absent key is not an error
    store.remove("fetchData").await.unwrap();

    store.close().await;
}

#[tokio::test]
async fn test_values_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("state.db");

    let store = SqliteStore::new(&path).await.unwrap();
    store.set("downloadTasks", b"{}".to_vec()).await.unwrap();
    store.close().await;

    // Reopening must not re-run migration v1
    let store = SqliteStore::new(&path).await.unwrap();
    assert_eq!(
        store.get("downloadTasks").await.unwrap(),
        Some(b"{}".to_vec())
    );
    store.close().await;
}
