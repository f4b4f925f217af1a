//! Persisted key/value state
//!
//! Whole-document storage for the two blobs the refresh keeps across launches:
//! - `fetchData` - the [`FetchState`](crate::coordinator::FetchState) used by the cool-down check
//! - `downloadTasks` - the [`TaskRegistry`](crate::registry::TaskRegistry) document
//!
//! ## Submodules
//!
//! - [`sqlite`] - durable SQLite backing store
//! - [`memory`] - in-memory backing store for tests and ephemeral use
//!
//! [`StateStore`] is the typed façade over a [`PersistedStore`] backend. Values are
//! JSON documents. Undecodable values are logged and treated as absent.

use crate::coordinator::FetchState;
use crate::error::Result;
use crate::registry::RegistrySnapshot;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::Mutex;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Key of the Fetch State document
pub const FETCH_DATA_KEY: &str = "fetchData";
/// Key of the download task registry document
pub const DOWNLOAD_TASKS_KEY: &str = "downloadTasks";

/// Backing key/value store with whole-document semantics
#[async_trait]
pub trait PersistedStore: Send + Sync {
    /// Read the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Replace the value stored under `key`
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Delete the value stored under `key`
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Typed access to the persisted documents
///
/// Cloning is cheap; clones share the backend and the per-key critical sections.
#[derive(Clone)]
pub struct StateStore {
    backend: Arc<dyn PersistedStore>,
    fetch_data_lock: Arc<Mutex<()>>,
    download_tasks_lock: Arc<Mutex<()>>,
}

impl StateStore {
    /// Wrap a backing store
    pub fn new(backend: Arc<dyn PersistedStore>) -> Self {
        Self {
            backend,
            fetch_data_lock: Arc::new(Mutex::new(())),
            download_tasks_lock: Arc::new(Mutex::new(())),
        }
    }

    /// State store over a fresh [`MemoryStore`]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Last persisted Fetch State, if any
    pub async fn fetch_state(&self) -> Option<FetchState> {
        let _guard = self.fetch_data_lock.lock().await;
        self.load(FETCH_DATA_KEY).await
    }

    /// Replace the persisted Fetch State
    pub async fn set_fetch_state(&self, state: &FetchState) -> Result<()> {
        let _guard = self.fetch_data_lock.lock().await;
        self.save(FETCH_DATA_KEY, state).await
    }

    /// Persisted download task registry (empty when absent or corrupt)
    pub async fn download_tasks(&self) -> RegistrySnapshot {
        let _guard = self.download_tasks_lock.lock().await;
        self.load(DOWNLOAD_TASKS_KEY).await.unwrap_or_default()
    }

    /// Replace the persisted download task registry
    pub async fn set_download_tasks(&self, tasks: &RegistrySnapshot) -> Result<()> {
        let _guard = self.download_tasks_lock.lock().await;
        self.save(DOWNLOAD_TASKS_KEY, tasks).await
    }

    /// Read-modify-write the registry document inside its critical section
    pub async fn update_download_tasks<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut RegistrySnapshot) -> R,
    {
        let _guard = self.download_tasks_lock.lock().await;
        let mut tasks: RegistrySnapshot = self.load(DOWNLOAD_TASKS_KEY).await.unwrap_or_default();
        let result = f(&mut tasks);
        self.save(DOWNLOAD_TASKS_KEY, &tasks).await?;
        Ok(result)
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!(key, error = %e, "failed to read persisted value, treating as absent");
                return None;
            }
        };

        match serde_json::from_slice(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "persisted value is not decodable, treating as absent");
                None
            }
        }
    }

    async fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_vec(value)?;
        self.backend.set(key, raw).await
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
