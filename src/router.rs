//! Session event router
//!
//! Demultiplexes the transport's per-task callbacks onto the [`TransportTask`] they
//! belong to, and relays the one-shot "background events drained" signal to the
//! continuation supplied when the process was relaunched for the session.

use crate::error::TransportError;
use crate::task::{Completion, TransportTask};
use crate::transport::SessionEvent;
use crate::types::{ResponseMetadata, TaskId, TaskKind, TaskOutcome};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Continuation invoked once every background callback has been replayed
pub type DrainContinuation = Box<dyn FnOnce() + Send>;

#[derive(Default)]
enum DrainState {
    #[default]
    Idle,
    Waiting(Vec<DrainContinuation>),
    // Signal arrived before anyone asked for it
    Drained,
}

/// What a dispatched callback produced
pub enum RouterOutput {
    /// Nothing for the caller to act on
    Nothing,
    /// Response headers arrived for a task
    ResponseReceived {
        /// Task identifier
        task_id: TaskId,
        /// Task kind
        kind: TaskKind,
        /// Response metadata
        response: ResponseMetadata,
    },
    /// A download's file is now in the private temp directory
    ///
    /// The transport is released once `ack` is signalled or dropped.
    FileStored {
        /// Task identifier
        task_id: TaskId,
        /// New location of the file
        path: PathBuf,
        /// Acknowledgement owed to the transport
        ack: oneshot::Sender<()>,
    },
    /// A download's file could not be taken over
    ///
    /// The failure becomes the task's outcome. The transport is released once `ack`
    /// is signalled or dropped.
    FileFailed {
        /// Task identifier
        task_id: TaskId,
        /// Filesystem error of the failed move
        error: TransportError,
        /// Acknowledgement owed to the transport
        ack: oneshot::Sender<()>,
    },
    /// A task produced its terminal outcome and left the table
    Finished(FinishedTask),
}

/// Terminal outcome of a task, not yet handed to its caller
pub struct FinishedTask {
    /// Task identifier
    pub task_id: TaskId,
    /// Task kind
    pub kind: TaskKind,
    /// The single terminal outcome
    pub outcome: TaskOutcome,
    completion: Option<Completion>,
}

impl FinishedTask {
    /// Hand the outcome to the caller that issued the task
    ///
    /// Returns `false` when nobody is waiting (a restored task, or a caller that
    /// dropped its handle). Calling it again is a no-op.
    pub fn deliver(&mut self) -> bool {
        match self.completion.take() {
            Some(completion) => completion.send(self.outcome.clone()).is_ok(),
            None => false,
        }
    }
}

/// Routes callbacks by task identifier
#[derive(Default)]
pub struct SessionRouter {
    tasks: HashMap<TaskId, TransportTask>,
    drain: DrainState,
}

impl SessionRouter {
    /// Create an empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Start routing the callbacks of `task`
    pub fn track(&mut self, task: TransportTask) {
        let id = task.id();
        if self.tasks.insert(id, task).is_some() {
            warn!(task_id = id.get(), "replaced an already tracked task");
        }
    }

    /// Whether callbacks for `task_id` are routed
    pub fn is_tracking(&self, task_id: TaskId) -> bool {
        self.tasks.contains_key(&task_id)
    }

    /// Number of tracked tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task is tracked
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Route one callback
    ///
    /// Callbacks for identifiers that are not tracked are logged and dropped.
    pub async fn dispatch(&mut self, event: SessionEvent) -> RouterOutput {
        match event {
            SessionEvent::Started { task_id, response } => {
                let Some(task) = self.lookup(task_id, "started") else {
                    return RouterOutput::Nothing;
                };
                debug!(task_id = task_id.get(), status = response.status, "response started");
                task.on_started(response.clone());
                RouterOutput::ResponseReceived {
                    task_id,
                    kind: task.kind(),
                    response,
                }
            }
            SessionEvent::Data { task_id, chunk } => {
                if let Some(task) = self.lookup(task_id, "data") {
                    task.on_data(chunk);
                }
                RouterOutput::Nothing
            }
            SessionEvent::FileReady {
                task_id,
                location,
                moved,
            } => {
                // Dropping `moved` on the early returns releases the transport
                let Some(task) = self.lookup(task_id, "file-ready") else {
                    return RouterOutput::Nothing;
                };
                match task.on_file_ready(&location).await {
                    Ok(Some(path)) => RouterOutput::FileStored {
                        task_id,
                        path,
                        ack: moved,
                    },
                    Ok(None) => RouterOutput::Nothing,
                    Err(error) => RouterOutput::FileFailed {
                        task_id,
                        error,
                        ack: moved,
                    },
                }
            }
            SessionEvent::Completed { task_id, error } => self.complete(task_id, error),
            SessionEvent::BackgroundEventsDrained => {
                self.background_events_drained();
                RouterOutput::Nothing
            }
        }
    }

    fn lookup(&mut self, task_id: TaskId, event: &'static str) -> Option<&mut TransportTask> {
        let task = self.tasks.get_mut(&task_id);
        if task.is_none() {
            warn!(task_id = task_id.get(), event, "dropping callback for unknown task");
        }
        task
    }

    fn complete(&mut self, task_id: TaskId, error: Option<TransportError>) -> RouterOutput {
        let Some(task) = self.tasks.remove(&task_id) else {
            warn!(task_id = task_id.get(), event = "completed", "dropping callback for unknown task");
            return RouterOutput::Nothing;
        };
        let kind = task.kind();
        let (completion, outcome) = task.on_completed(error);
        debug!(task_id = task_id.get(), success = outcome.is_ok(), "task finished");
        RouterOutput::Finished(FinishedTask {
            task_id,
            kind,
            outcome,
            completion,
        })
    }

    /// Store the continuation owed to the platform for this relaunch
    ///
    /// Runs it right away if the drained signal already arrived. Continuations
    /// registered while waiting all run, in order, once the signal arrives.
    pub fn set_background_completion(&mut self, continuation: DrainContinuation) {
        match std::mem::take(&mut self.drain) {
            DrainState::Drained => {
                debug!("background events already drained, running continuation");
                continuation();
            }
            DrainState::Waiting(mut pending) => {
                warn!(pending = pending.len(), "another background-events continuation registered");
                pending.push(continuation);
                self.drain = DrainState::Waiting(pending);
            }
            DrainState::Idle => self.drain = DrainState::Waiting(vec![continuation]),
        }
    }

    fn background_events_drained(&mut self) {
        match std::mem::take(&mut self.drain) {
            DrainState::Waiting(pending) => {
                debug!(pending = pending.len(), "background events drained, running continuations");
                for continuation in pending {
                    continuation();
                }
            }
            DrainState::Idle | DrainState::Drained => {
                debug!("background events drained before a continuation was registered");
                self.drain = DrainState::Drained;
            }
        }
    }
}
