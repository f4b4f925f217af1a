//! The network session boundary
//!
//! A [`Transport`] is the shared session every transfer runs in. It creates tasks,
//! starts and cancels them, reports which tasks are still alive, and delivers the
//! per-task callbacks ([`SessionEvent`]) to the [`EventSink`] it was connected to.
//!
//! For a single task, callbacks arrive in the order
//! `Started → {Data | FileReady}* → Completed` and are never duplicated. There is no
//! ordering guarantee across tasks.

use crate::error::{Result, TransportError};
use crate::router::DrainContinuation;
use crate::task::TransportTask;
use crate::types::{ResponseMetadata, TaskId, TaskKind};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use url::Url;

pub mod http;

pub use http::HttpTransport;

/// A task the transport still considers alive
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LiveTask {
    /// Task identifier
    pub id: TaskId,
    /// Task kind
    pub kind: TaskKind,
}

/// Low-level per-task callback
#[derive(Debug)]
pub enum SessionEvent {
    /// Response headers received
    Started {
        /// Task the event belongs to
        task_id: TaskId,
        /// Response metadata
        response: ResponseMetadata,
    },
    /// A chunk of the body of a fetch
    Data {
        /// Task the event belongs to
        task_id: TaskId,
        /// Body chunk
        chunk: Bytes,
    },
    /// A download's body is complete in an ephemeral file
    ///
    /// The file is deleted by the transport once `moved` is signalled or dropped.
    FileReady {
        /// Task the event belongs to
        task_id: TaskId,
        /// Ephemeral file location
        location: PathBuf,
        /// Acknowledgement that the file was taken over
        moved: oneshot::Sender<()>,
    },
    /// The task finished, with an error unless it succeeded
    Completed {
        /// Task the event belongs to
        task_id: TaskId,
        /// Terminal transport error
        error: Option<TransportError>,
    },
    /// Every background callback queued for the session has been replayed
    BackgroundEventsDrained,
}

impl SessionEvent {
    /// Task the event belongs to, if it is a per-task event
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            SessionEvent::Started { task_id, .. }
            | SessionEvent::Data { task_id, .. }
            | SessionEvent::FileReady { task_id, .. }
            | SessionEvent::Completed { task_id, .. } => Some(*task_id),
            SessionEvent::BackgroundEventsDrained => None,
        }
    }
}

/// Message processed by the serialized event loop
pub(crate) enum Inbound {
    /// Callback from the transport
    Session(SessionEvent),
    /// Start routing callbacks of a task
    Track(TransportTask),
    /// Continuation to run once background events are drained
    AwaitDrain(DrainContinuation),
    /// Stop the event loop
    Shutdown,
}

/// Receiving end the transport delivers its callbacks to
///
/// Cloneable; every clone feeds the same serialized event loop.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl EventSink {
    /// Create a sink and the receiver that drains it
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Inbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue an event loop message behind everything sent so far
    ///
    /// Hands the message back when the event loop is gone.
    pub(crate) fn send(&self, message: Inbound) -> std::result::Result<(), Inbound> {
        self.tx.send(message).map_err(|rejected| rejected.0)
    }

    /// Deliver a callback; returns `false` when the event loop is gone
    pub fn emit(&self, event: SessionEvent) -> bool {
        self.send(Inbound::Session(event)).is_ok()
    }

    /// Deliver [`SessionEvent::FileReady`] and wait until the file has been taken over
    pub async fn file_ready(&self, task_id: TaskId, location: PathBuf) {
        let (moved, done) = oneshot::channel();
        if self.emit(SessionEvent::FileReady {
            task_id,
            location,
            moved,
        }) {
            // Err means the receiver dropped the acknowledgement, which also releases us
            let _ = done.await;
        }
    }
}

/// Shared network session
#[async_trait]
pub trait Transport: Send + Sync {
    /// Identifier of the session, part of every registry key
    fn session_identifier(&self) -> &str;

    /// Install the sink callbacks are delivered to
    ///
    /// No callback is emitted before this is called. Callbacks of tasks resumed from a
    /// previous launch are replayed after it.
    fn connect(&self, sink: EventSink);

    /// Create a suspended task for `url`
    async fn create_task(&self, kind: TaskKind, url: &Url) -> Result<TaskId>;

    /// Start a created task
    fn resume(&self, task_id: TaskId);

    /// Request cancellation; the task still completes through the normal callback path
    fn cancel(&self, task_id: TaskId);

    /// Tasks that have not completed yet
    async fn live_tasks(&self) -> Vec<LiveTask>;
}
