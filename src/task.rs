//! Transport task wrapper
//!
//! A [`TransportTask`] accumulates the callbacks of one transfer and turns them into
//! exactly one [`TaskOutcome`]. Fetches collect their body in memory. Downloads take
//! over the ephemeral file the transport hands them and keep it in the private temp
//! directory until the outcome is consumed.

use crate::error::TransportError;
use crate::registry::{DOWNLOAD_FILE_EXTENSION, DownloadContent};
use crate::types::{
    DownloadedFile, Payload, ResponseMetadata, TaskId, TaskKey, TaskKind, TaskOutcome, TempFile,
};
use bytes::{Bytes, BytesMut};
use std::path::{Path, PathBuf};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Sender half of a caller's one-shot completion
pub type Completion = oneshot::Sender<TaskOutcome>;

enum TaskState {
    Fetch {
        buffer: BytesMut,
    },
    Download {
        key: TaskKey,
        temp_dir: PathBuf,
        file: Option<PathBuf>,
        move_error: Option<TransportError>,
    },
}

/// In-flight state of one transfer
pub struct TransportTask {
    id: TaskId,
    state: TaskState,
    response: Option<ResponseMetadata>,
    completion: Option<Completion>,
}

impl std::fmt::Debug for TransportTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportTask")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("response", &self.response)
            .field("has_caller", &self.completion.is_some())
            .finish()
    }
}

impl TransportTask {
    /// Wrapper for a fetch whose body is collected in memory
    pub fn fetch(id: TaskId, completion: Option<Completion>) -> Self {
        Self {
            id,
            state: TaskState::Fetch {
                buffer: BytesMut::new(),
            },
            response: None,
            completion,
        }
    }

    /// Wrapper for a download whose file is moved into `temp_dir`
    pub fn download(
        id: TaskId,
        key: TaskKey,
        temp_dir: PathBuf,
        completion: Option<Completion>,
    ) -> Self {
        Self {
            id,
            state: TaskState::Download {
                key,
                temp_dir,
                file: None,
                move_error: None,
            },
            response: None,
            completion,
        }
    }

    /// Rebuild a download resumed by the transport after a relaunch
    ///
    /// Nobody waits on a restored task; its outcome only reaches observers.
    pub fn restore(id: TaskId, key: TaskKey, temp_dir: PathBuf, content: DownloadContent) -> Self {
        Self {
            id,
            state: TaskState::Download {
                key,
                temp_dir,
                file: content.temp_file,
                move_error: content.error,
            },
            response: content.response,
            completion: None,
        }
    }

    /// Task identifier
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Task kind
    pub fn kind(&self) -> TaskKind {
        match self.state {
            TaskState::Fetch { .. } => TaskKind::Fetch,
            TaskState::Download { .. } => TaskKind::Download,
        }
    }

    /// Response headers arrived
    pub fn on_started(&mut self, response: ResponseMetadata) {
        self.response = Some(response);
    }

    /// A body chunk arrived
    pub fn on_data(&mut self, chunk: Bytes) {
        match &mut self.state {
            TaskState::Fetch { buffer } => buffer.extend_from_slice(&chunk),
            TaskState::Download { .. } => {
                warn!(task_id = self.id.get(), "ignoring body chunk delivered to a download");
            }
        }
    }

    /// The transport finished writing the body to an ephemeral file
    ///
    /// Moves the file into the private temp directory before returning, because the
    /// transport deletes `location` as soon as this returns. Returns the new location,
    /// `None` for a fetch, or the filesystem error of a failed move. A failed move
    /// becomes the task's outcome.
    pub async fn on_file_ready(
        &mut self,
        location: &Path,
    ) -> std::result::Result<Option<PathBuf>, TransportError> {
        let TaskState::Download {
            key,
            temp_dir,
            file,
            move_error,
        } = &mut self.state
        else {
            warn!(task_id = self.id.get(), "ignoring file delivered to a fetch");
            return Ok(None);
        };

        let destination = temp_dir.join(format!("{}.{}", key, DOWNLOAD_FILE_EXTENSION));
        match move_file(location, temp_dir, &destination).await {
            Ok(()) => {
                debug!(task_id = self.id.get(), path = ?destination, "took over downloaded file");
                *file = Some(destination.clone());
                Ok(Some(destination))
            }
            Err(e) => {
                warn!(task_id = self.id.get(), error = %e, "failed to move downloaded file");
                let error = TransportError::filesystem(&e);
                *move_error = Some(error.clone());
                Err(error)
            }
        }
    }

    /// The transfer completed; produce the single terminal outcome
    ///
    /// A transport error wins. Without one, a failed file move is the outcome, and
    /// otherwise the accumulated payload.
    ///
    /// # Panics
    ///
    /// Panics when the transport reports success but never delivered a payload
    /// (no response for a fetch, no file for a download). That is a broken transport
    /// contract, not a retryable failure.
    pub fn on_completed(self, error: Option<TransportError>) -> (Option<Completion>, TaskOutcome) {
        let Self {
            id,
            state,
            response,
            completion,
        } = self;

        let outcome = match state {
            TaskState::Fetch { buffer } => match (error, response) {
                (Some(error), _) => Err(error),
                (None, Some(response)) => Ok(Payload::Data {
                    body: buffer.freeze(),
                    response,
                }),
                (None, None) => {
                    panic!("transport completed fetch task {id} with neither error nor response")
                }
            },
            TaskState::Download {
                file, move_error, ..
            } => {
                // Owning the file here releases it on every failure path
                let owned = file.map(TempFile::new);
                match (error.or(move_error), owned) {
                    (Some(error), _) => Err(error),
                    (None, Some(file)) => Ok(Payload::File(DownloadedFile::new(file, response))),
                    (None, None) => {
                        panic!("transport completed download task {id} with neither error nor file")
                    }
                }
            }
        };

        (completion, outcome)
    }
}

async fn move_file(source: &Path, dir: &Path, destination: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    if tokio::fs::rename(source, destination).await.is_ok() {
        return Ok(());
    }
    // rename fails across filesystems; the transport removes the source afterwards
    tokio::fs::copy(source, destination).await?;
    Ok(())
}
