//! Scripted transport for driving the manager in tests.

use crate::error::{Result, TransportError};
use crate::transport::{EventSink, LiveTask, SessionEvent, Transport};
use crate::types::{ResponseMetadata, TaskId, TaskKind};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

pub(crate) const LAST_MODIFIED: &str = "Sat, 17 Nov 2018 02:43:26 GMT";

/// How the next resumed task behaves
#[derive(Clone, Debug)]
pub(crate) enum Script {
    /// Deliver `body` and complete successfully
    Succeed { status: u16, body: Bytes },
    /// Complete with `error` right away
    Fail(TransportError),
    /// Stay in flight until cancelled
    Hold,
}

impl Script {
    pub(crate) fn document(body: &str) -> Self {
        Script::Succeed {
            status: 200,
            body: Bytes::copy_from_slice(body.as_bytes()),
        }
    }
}

#[derive(Default)]
struct State {
    sink: Option<EventSink>,
    scripts: VecDeque<Script>,
    live: HashMap<TaskId, TaskKind>,
    created: Vec<(TaskId, TaskKind, Url)>,
}

/// In-memory [`Transport`] whose tasks follow queued [`Script`]s
pub(crate) struct ScriptedTransport {
    session: String,
    staging: PathBuf,
    next_id: AtomicU64,
    state: Mutex<State>,
}

impl ScriptedTransport {
    pub(crate) fn new(session: &str, staging: PathBuf) -> Self {
        Self {
            session: session.to_string(),
            staging,
            next_id: AtomicU64::new(1),
            state: Mutex::new(State::default()),
        }
    }

    /// Pretend the platform resumed `tasks` from a previous launch
    pub(crate) fn with_live(self, tasks: &[LiveTask]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for task in tasks {
                state.live.insert(task.id, task.kind);
            }
        }
        let next = tasks.iter().map(|t| t.id.get() + 1).max().unwrap_or(1);
        self.next_id.store(next, Ordering::SeqCst);
        self
    }

    pub(crate) fn push_script(&self, script: Script) {
        self.state.lock().unwrap().scripts.push_back(script);
    }

    pub(crate) fn created(&self) -> Vec<(TaskId, TaskKind, Url)> {
        self.state.lock().unwrap().created.clone()
    }

    /// Inject a raw callback, as the platform does when replaying background events
    pub(crate) fn emit(&self, event: SessionEvent) -> bool {
        let sink = self.state.lock().unwrap().sink.clone();
        sink.expect("transport is not connected").emit(event)
    }

    pub(crate) async fn file_ready(&self, task_id: TaskId, location: PathBuf) {
        let sink = self.state.lock().unwrap().sink.clone();
        sink.expect("transport is not connected")
            .file_ready(task_id, location)
            .await;
    }

    fn finish(&self, task_id: TaskId) -> bool {
        self.state.lock().unwrap().live.remove(&task_id).is_some()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn session_identifier(&self) -> &str {
        &self.session
    }

    fn connect(&self, sink: EventSink) {
        self.state.lock().unwrap().sink = Some(sink);
    }

    async fn create_task(&self, kind: TaskKind, url: &Url) -> Result<TaskId> {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut state = self.state.lock().unwrap();
        state.live.insert(id, kind);
        state.created.push((id, kind, url.clone()));
        Ok(id)
    }

    fn resume(&self, task_id: TaskId) {
        let (sink, kind, script) = {
            let mut state = self.state.lock().unwrap();
            let Some(kind) = state.live.get(&task_id).copied() else {
                return;
            };
            let script = state.scripts.pop_front().unwrap_or(Script::Hold);
            (state.sink.clone().expect("resumed before connect"), kind, script)
        };

        match script {
            Script::Hold => {}
            Script::Fail(error) => {
                self.finish(task_id);
                sink.emit(SessionEvent::Completed {
                    task_id,
                    error: Some(error),
                });
            }
            Script::Succeed { status, body } => {
                self.finish(task_id);
                let staging = self.staging.clone();
                tokio::spawn(async move {
                    sink.emit(SessionEvent::Started {
                        task_id,
                        response: ResponseMetadata {
                            status,
                            last_modified: Some(LAST_MODIFIED.to_string()),
                            content_length: Some(body.len() as u64),
                        },
                    });
                    match kind {
                        TaskKind::Fetch => {
                            sink.emit(SessionEvent::Data {
                                task_id,
                                chunk: body,
                            });
                        }
                        TaskKind::Download => {
                            std::fs::create_dir_all(&staging).unwrap();
                            let location = staging.join(format!("{}.eph", task_id));
                            std::fs::write(&location, &body).unwrap();
                            sink.file_ready(task_id, location.clone()).await;
                            let _ = std::fs::remove_file(&location);
                        }
                    }
                    sink.emit(SessionEvent::Completed {
                        task_id,
                        error: None,
                    });
                });
            }
        }
    }

    fn cancel(&self, task_id: TaskId) {
        if self.finish(task_id) {
            self.emit(SessionEvent::Completed {
                task_id,
                error: Some(TransportError::cancelled()),
            });
        }
    }

    async fn live_tasks(&self) -> Vec<LiveTask> {
        let mut live: Vec<LiveTask> = self
            .state
            .lock()
            .unwrap()
            .live
            .iter()
            .map(|(id, kind)| LiveTask {
                id: *id,
                kind: *kind,
            })
            .collect();
        live.sort_by_key(|task| task.id);
        live
    }
}
