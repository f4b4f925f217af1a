//! Core types for background-fetch

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::TransportError;

/// Identifier of a transport task, unique within one session
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a transport task produces
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Response body collected in memory
    Fetch,
    /// Response body streamed to a file on disk
    Download,
}

/// Composite registry key: session identifier plus task identifier
///
/// Rendered as `"{session}_{task}"`, the format used for the persisted registry.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskKey(String);

impl TaskKey {
    /// Build the key for a task of the given session
    pub fn new(session_identifier: &str, task_id: TaskId) -> Self {
        Self(format!("{}_{}", session_identifier, task_id.0))
    }

    /// Key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Response metadata seen when the transfer started
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    /// HTTP status code
    pub status: u16,
    /// Verbatim `Last-Modified` header value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    /// Announced body length
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
}

/// Temporary file owned by a finished download
///
/// The file is removed when the last [`DownloadedFile`] referring to it is dropped.
#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
}

impl TempFile {
    /// Take ownership of the file at `path`
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Location of the file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = ?self.path, "released temp file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = ?self.path, error = %e, "failed to release temp file")
            }
        }
    }
}

/// Result file of a successful download
#[derive(Clone, Debug)]
pub struct DownloadedFile {
    file: Arc<TempFile>,
    /// Response metadata, if the transfer reported any
    pub response: Option<ResponseMetadata>,
}

impl DownloadedFile {
    /// Wrap a finished download
    pub fn new(file: TempFile, response: Option<ResponseMetadata>) -> Self {
        Self {
            file: Arc::new(file),
            response,
        }
    }

    /// Location of the downloaded file
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Successful task payload
#[derive(Clone, Debug)]
pub enum Payload {
    /// In-memory body of a fetch
    Data {
        /// Accumulated body
        body: Bytes,
        /// Response metadata
        response: ResponseMetadata,
    },
    /// File produced by a download
    File(DownloadedFile),
}

/// Terminal outcome of a transport task
pub type TaskOutcome = std::result::Result<Payload, TransportError>;

/// Result of one Fetch Coordinator invocation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchResult {
    /// New document fetched and stored
    Success,
    /// Cool-down still active, nothing was requested
    Skip,
    /// Transfer or decode failed
    Failed,
}

/// Result reported to the OS periodic-wake trigger
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundFetchResult {
    /// New data was downloaded
    NewData,
    /// There was nothing new
    NoData,
    /// The attempt failed
    Failed,
}

impl From<FetchResult> for BackgroundFetchResult {
    fn from(result: FetchResult) -> Self {
        match result {
            FetchResult::Success => BackgroundFetchResult::NewData,
            FetchResult::Skip => BackgroundFetchResult::NoData,
            FetchResult::Failed => BackgroundFetchResult::Failed,
        }
    }
}
