//! HTTP transport over `reqwest`
//!
//! Each task performs one GET. Downloads are streamed into a staging directory the
//! transport owns; the [`EventSink`] is told about the finished file and the staging
//! copy is deleted once the sink has taken it over.

use super::{EventSink, LiveTask, SessionEvent, Transport};
use crate::config::Config;
use crate::error::{Error, Result, TransportError};
use crate::types::{ResponseMetadata, TaskId, TaskKind};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

struct Transfer {
    kind: TaskKind,
    url: Url,
    cancel: CancellationToken,
    resumed: bool,
}

type Transfers = Arc<Mutex<HashMap<TaskId, Transfer>>>;

/// [`Transport`] performing real HTTP requests
pub struct HttpTransport {
    session_identifier: String,
    client: reqwest::Client,
    staging_dir: PathBuf,
    next_id: AtomicU64,
    transfers: Transfers,
    sink: OnceLock<EventSink>,
}

impl HttpTransport {
    /// Create a transport for the session in `config`
    ///
    /// Downloads are staged in `staging` under the configured temp directory.
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(Error::Network)?;

        Ok(Self {
            session_identifier: config.session_identifier.clone(),
            client,
            staging_dir: config.temp_dir.join("staging"),
            next_id: AtomicU64::new(1),
            transfers: Arc::new(Mutex::new(HashMap::new())),
            sink: OnceLock::new(),
        })
    }

    /// Stage downloads in `dir` instead
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, Transfer>> {
        // A poisoned map is still consistent; every mutation is a single insert/remove
        self.transfers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn session_identifier(&self) -> &str {
        &self.session_identifier
    }

    fn connect(&self, sink: EventSink) {
        if self.sink.set(sink).is_err() {
            warn!(session = %self.session_identifier, "transport is already connected");
        }
    }

    async fn create_task(&self, kind: TaskKind, url: &Url) -> Result<TaskId> {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(
            id,
            Transfer {
                kind,
                url: url.clone(),
                cancel: CancellationToken::new(),
                resumed: false,
            },
        );
        debug!(task_id = id.get(), ?kind, %url, "created transfer");
        Ok(id)
    }

    fn resume(&self, task_id: TaskId) {
        let Some(sink) = self.sink.get().cloned() else {
            warn!(task_id = task_id.get(), "cannot resume a transfer before the transport is connected");
            return;
        };

        let (kind, url, cancel) = {
            let mut transfers = self.lock();
            let Some(transfer) = transfers.get_mut(&task_id) else {
                warn!(task_id = task_id.get(), "cannot resume unknown transfer");
                return;
            };
            if transfer.resumed {
                return;
            }
            transfer.resumed = true;
            (transfer.kind, transfer.url.clone(), transfer.cancel.clone())
        };

        let client = self.client.clone();
        let transfers = self.transfers.clone();
        let partial = self.staging_dir.join(format!("{}.partial", task_id));
        let staging_dir = self.staging_dir.clone();

        tokio::spawn(async move {
            let error = tokio::select! {
                _ = cancel.cancelled() => Some(TransportError::cancelled()),
                result = run_transfer(&client, &sink, task_id, kind, url, &staging_dir, &partial) => result.err(),
            };

            if let Err(e) = tokio::fs::remove_file(&partial).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(task_id = task_id.get(), error = %e, "failed to remove staged download");
                }
            }

            transfers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(&task_id);
            debug!(task_id = task_id.get(), error = ?error, "transfer completed");
            sink.emit(SessionEvent::Completed { task_id, error });
        });
    }

    fn cancel(&self, task_id: TaskId) {
        let mut transfers = self.lock();
        let Some(transfer) = transfers.get(&task_id) else {
            debug!(task_id = task_id.get(), "cancel requested for a finished transfer");
            return;
        };

        if transfer.resumed {
            transfer.cancel.cancel();
            return;
        }

        // Never started, so nothing else will report its completion
        transfers.remove(&task_id);
        drop(transfers);
        if let Some(sink) = self.sink.get() {
            sink.emit(SessionEvent::Completed {
                task_id,
                error: Some(TransportError::cancelled()),
            });
        }
    }

    async fn live_tasks(&self) -> Vec<LiveTask> {
        let mut live: Vec<LiveTask> = self
            .lock()
            .iter()
            .map(|(id, transfer)| LiveTask {
                id: *id,
                kind: transfer.kind,
            })
            .collect();
        live.sort_by_key(|task| task.id);
        live
    }
}

async fn run_transfer(
    client: &reqwest::Client,
    sink: &EventSink,
    task_id: TaskId,
    kind: TaskKind,
    url: Url,
    staging_dir: &Path,
    partial: &Path,
) -> std::result::Result<(), TransportError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| TransportError::from(&e))?;

    let metadata = ResponseMetadata {
        status: response.status().as_u16(),
        last_modified: response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        content_length: response.content_length(),
    };
    sink.emit(SessionEvent::Started {
        task_id,
        response: metadata,
    });

    let mut stream = response.bytes_stream();
    match kind {
        TaskKind::Fetch => {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| TransportError::from(&e))?;
                sink.emit(SessionEvent::Data { task_id, chunk });
            }
        }
        TaskKind::Download => {
            tokio::fs::create_dir_all(staging_dir)
                .await
                .map_err(|e| TransportError::filesystem(&e))?;
            let mut file = tokio::fs::File::create(partial)
                .await
                .map_err(|e| TransportError::filesystem(&e))?;

            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| TransportError::from(&e))?;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| TransportError::filesystem(&e))?;
            }
            file.flush()
                .await
                .map_err(|e| TransportError::filesystem(&e))?;
            drop(file);

            sink.file_ready(task_id, partial.to_path_buf()).await;
        }
    }

    Ok(())
}
