//! Persistent task registry
//!
//! Records, for every outstanding download, enough metadata to rebuild its
//! [`TransportTask`](crate::task::TransportTask) after the process is relaunched: the
//! location the finished file was moved to, the transport error if one was seen, and
//! the response metadata. The whole registry is one JSON document under the
//! `downloadTasks` key.

use crate::error::{Result, TransportError};
use crate::store::StateStore;
use crate::transport::LiveTask;
use crate::types::{ResponseMetadata, TaskId, TaskKey, TaskKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File extension of download files moved into the temp directory
pub const DOWNLOAD_FILE_EXTENSION: &str = "download";

/// Persisted metadata of one outstanding download
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadContent {
    /// Where the finished file was moved to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_file: Option<PathBuf>,
    /// Terminal transport error, once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TransportError>,
    /// Response metadata, once headers were received
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseMetadata>,
}

/// The persisted registry document
pub type RegistrySnapshot = BTreeMap<TaskKey, DownloadContent>;

/// Registry of outstanding downloads for one session
#[derive(Clone)]
pub struct TaskRegistry {
    store: StateStore,
    session_identifier: String,
}

impl TaskRegistry {
    /// Create a registry for `session_identifier`
    pub fn new(store: StateStore, session_identifier: impl Into<String>) -> Self {
        Self {
            store,
            session_identifier: session_identifier.into(),
        }
    }

    /// Composite key of a task of this session
    pub fn key(&self, task_id: TaskId) -> TaskKey {
        TaskKey::new(&self.session_identifier, task_id)
    }

    /// Record a newly issued download
    pub async fn add(&self, task_id: TaskId) -> Result<TaskKey> {
        let key = self.key(task_id);
        let entry_key = key.clone();
        self.store
            .update_download_tasks(move |tasks| {
                tasks.insert(entry_key, DownloadContent::default());
            })
            .await?;
        debug!(key = %key, "registered download task");
        Ok(key)
    }

    /// Modify the entry of a task; returns `false` when there is no entry
    pub async fn update<F>(&self, task_id: TaskId, f: F) -> Result<bool>
    where
        F: FnOnce(&mut DownloadContent),
    {
        let key = self.key(task_id);
        self.store
            .update_download_tasks(move |tasks| match tasks.get_mut(&key) {
                Some(content) => {
                    f(content);
                    true
                }
                None => false,
            })
            .await
    }

    /// Forget a task whose completion has been delivered
    pub async fn remove(&self, task_id: TaskId) -> Result<()> {
        let key = self.key(task_id);
        let removed = self
            .store
            .update_download_tasks({
                let key = key.clone();
                move |tasks| tasks.remove(&key).is_some()
            })
            .await?;
        if removed {
            debug!(key = %key, "removed download task");
        }
        Ok(())
    }

    /// Current registry document
    pub async fn snapshot(&self) -> RegistrySnapshot {
        self.store.download_tasks().await
    }

    /// Replace the registry document
    pub async fn replace(&self, tasks: &RegistrySnapshot) -> Result<()> {
        self.store.set_download_tasks(tasks).await
    }

    /// Cross-reference the persisted registry with the tasks the transport still reports
    ///
    /// Keeps an entry only when the transport reports its task as a live download and
    /// any file it references still exists. The registry is replaced with the
    /// survivors, which are returned for reconstruction.
    ///
    /// Entries whose task the transport no longer reports are dropped without a
    /// terminal callback ever being delivered for them.
    pub async fn reconcile(&self, live: &[LiveTask]) -> Result<Vec<(TaskId, DownloadContent)>> {
        let mut persisted = self.snapshot().await;
        let mut surviving = RegistrySnapshot::new();
        let mut reconstructed = Vec::new();

        for task in live.iter().filter(|t| t.kind == TaskKind::Download) {
            let key = self.key(task.id);
            let Some(content) = persisted.remove(&key) else {
                warn!(task_id = task.id.get(), "live download has no registry entry, ignoring its events");
                continue;
            };

            if let Some(path) = &content.temp_file {
                let exists = tokio::fs::try_exists(path).await.unwrap_or(false);
                if !exists {
                    warn!(key = %key, path = ?path, "registry entry references a missing file, dropping it");
                    continue;
                }
            }

            surviving.insert(key, content.clone());
            reconstructed.push((task.id, content));
        }

        for key in persisted.keys() {
            warn!(key = %key, "download is no longer reported by the transport, pruning its entry");
        }

        self.replace(&surviving).await?;

        info!(
            surviving = reconstructed.len(),
            pruned = persisted.len(),
            "reconciled download task registry"
        );
        Ok(reconstructed)
    }
}

/// Remove download files in `temp_dir` that no registry entry references
///
/// Returns the number of removed files. Failures are logged and skipped.
pub async fn sweep_orphaned_files(temp_dir: &Path, registry: &RegistrySnapshot) -> usize {
    let referenced: Vec<&Path> = registry
        .values()
        .filter_map(|content| content.temp_file.as_deref())
        .collect();

    let mut entries = match tokio::fs::read_dir(temp_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            warn!(dir = ?temp_dir, error = %e, "failed to scan temp directory for orphaned files");
            return 0;
        }
    };

    let mut removed = 0;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(dir = ?temp_dir, error = %e, "failed to read temp directory entry");
                break;
            }
        };

        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(DOWNLOAD_FILE_EXTENSION) {
            continue;
        }
        if referenced.iter().any(|r| *r == path) {
            continue;
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = ?path, "removed orphaned download file");
                removed += 1;
            }
            Err(e) => warn!(path = ?path, error = %e, "failed to remove orphaned download file"),
        }
    }

    if removed > 0 {
        info!(removed, "swept orphaned download files");
    }
    removed
}
