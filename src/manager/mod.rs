//! Network manager
//!
//! Owns the shared [`Transport`] session and the serialized event loop that routes its
//! callbacks. At start it reconciles the persisted download registry with the tasks
//! the transport still reports, so downloads finished while the process was dead are
//! delivered to observers once their callbacks are replayed.
//!
//! - [`NetworkManager::fetch`] collects a response body in memory, nothing is persisted
//! - [`NetworkManager::download`] registers the task before it starts and removes the
//!   entry once its outcome has been delivered
//!
//! Every issued task produces exactly one outcome, delivered first to its
//! [`PendingTask`] and then, for downloads, to every subscribed [`DownloadObserver`].

mod event_loop;
mod lifecycle;
mod observer;

pub use observer::{DownloadObserver, Subscription};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::registry::{TaskRegistry, sweep_orphaned_files};
use crate::router::SessionRouter;
use crate::store::StateStore;
use crate::task::TransportTask;
use crate::transport::{EventSink, Inbound, Transport};
use crate::types::{TaskId, TaskKind, TaskOutcome};
use event_loop::EventLoop;
use observer::ObserverList;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};
use url::Url;

/// Handle on an issued task
pub struct PendingTask {
    id: TaskId,
    kind: TaskKind,
    transport: Arc<dyn Transport>,
    outcome: oneshot::Receiver<TaskOutcome>,
}

impl std::fmt::Debug for PendingTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTask")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

impl PendingTask {
    /// Task identifier
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Task kind
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Request cancellation
    ///
    /// The outcome still arrives through [`outcome`](Self::outcome), as a
    /// cancellation error unless the task finished first.
    pub fn cancel(&self) {
        self.transport.cancel(self.id);
    }

    /// Wait for the terminal outcome
    ///
    /// Fails with [`Error::SessionClosed`] when the manager stopped before the task
    /// finished.
    pub async fn outcome(self) -> Result<TaskOutcome> {
        self.outcome.await.map_err(|_| Error::SessionClosed)
    }
}

/// Issues transfers on the shared session and fans out their outcomes
pub struct NetworkManager {
    transport: Arc<dyn Transport>,
    registry: TaskRegistry,
    sink: EventSink,
    temp_dir: PathBuf,
    observers: Arc<ObserverList>,
    event_loop: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl NetworkManager {
    /// Attach to the session and recover the downloads it still runs
    ///
    /// 1. Reconciles the registry with the transport's live tasks
    /// 2. Removes download files no surviving entry references
    /// 3. Rebuilds a task for every surviving download
    /// 4. Starts the event loop and connects the transport to it
    pub async fn start(
        transport: Arc<dyn Transport>,
        store: StateStore,
        config: &Config,
    ) -> Result<Arc<Self>> {
        let registry = TaskRegistry::new(store, transport.session_identifier());

        let live = transport.live_tasks().await;
        let survivors = registry.reconcile(&live).await?;
        sweep_orphaned_files(&config.temp_dir, &registry.snapshot().await).await;

        let mut router = SessionRouter::new();
        for (task_id, content) in survivors {
            debug!(task_id = task_id.get(), "restoring download task");
            router.track(TransportTask::restore(
                task_id,
                registry.key(task_id),
                config.temp_dir.clone(),
                content,
            ));
        }
        let restored = router.len();

        let observers = Arc::new(ObserverList::default());
        let (sink, inbox) = EventSink::channel();
        let handle = EventLoop {
            router,
            registry: registry.clone(),
            observers: observers.clone(),
            inbox,
        }
        .spawn();

        transport.connect(sink.clone());

        info!(
            session = transport.session_identifier(),
            live = live.len(),
            restored,
            "network manager started"
        );

        Ok(Arc::new(Self {
            transport,
            registry,
            sink,
            temp_dir: config.temp_dir.clone(),
            observers,
            event_loop: Mutex::new(Some(handle)),
        }))
    }

    /// Session identifier of the underlying transport
    pub fn session_identifier(&self) -> &str {
        self.transport.session_identifier()
    }

    /// The persistent registry of outstanding downloads
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Collect the body of `url` in memory
    pub async fn fetch(&self, url: &Url) -> Result<PendingTask> {
        let task_id = self.transport.create_task(TaskKind::Fetch, url).await?;
        let (completion, outcome) = oneshot::channel();
        self.issue(TransportTask::fetch(task_id, Some(completion)))?;

        debug!(task_id = task_id.get(), %url, "issued fetch");
        Ok(self.pending(task_id, TaskKind::Fetch, outcome))
    }

    /// Download `url` to a file that survives process termination
    ///
    /// The registry entry is written before the transfer starts.
    pub async fn download(&self, url: &Url) -> Result<PendingTask> {
        let task_id = self.transport.create_task(TaskKind::Download, url).await?;
        let key = match self.registry.add(task_id).await {
            Ok(key) => key,
            Err(e) => {
                self.transport.cancel(task_id);
                return Err(e);
            }
        };

        let (completion, outcome) = oneshot::channel();
        self.issue(TransportTask::download(
            task_id,
            key,
            self.temp_dir.clone(),
            Some(completion),
        ))?;

        info!(task_id = task_id.get(), %url, "issued download");
        Ok(self.pending(task_id, TaskKind::Download, outcome))
    }

    fn issue(&self, task: TransportTask) -> Result<()> {
        let task_id = task.id();
        // Tracking is queued ahead of every callback the resumed task can produce
        if self.sink.send(Inbound::Track(task)).is_err() {
            self.transport.cancel(task_id);
            return Err(Error::SessionClosed);
        }
        self.transport.resume(task_id);
        Ok(())
    }

    fn pending(
        &self,
        id: TaskId,
        kind: TaskKind,
        outcome: oneshot::Receiver<TaskOutcome>,
    ) -> PendingTask {
        PendingTask {
            id,
            kind,
            transport: self.transport.clone(),
            outcome,
        }
    }

    /// Notify `observer` of every finished download until it is dropped or unsubscribed
    pub fn subscribe(&self, observer: Weak<dyn DownloadObserver>) -> Subscription {
        self.observers.subscribe(observer)
    }

    /// Stop notifying the observer behind `subscription`
    pub fn unsubscribe(&self, subscription: &Subscription) {
        if !self.observers.unsubscribe(subscription) {
            debug!(?subscription, "observer was already unsubscribed");
        }
    }

    /// Run `continuation` once the transport replayed every queued background callback
    ///
    /// A continuation for another session cannot be drained here and runs at once.
    pub fn handle_background_session_events<F>(&self, identifier: &str, continuation: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if identifier != self.session_identifier() {
            warn!(
                identifier,
                session = self.session_identifier(),
                "background events for a foreign session, completing immediately"
            );
            continuation();
            return;
        }

        if let Err(Inbound::AwaitDrain(continuation)) =
            self.sink.send(Inbound::AwaitDrain(Box::new(continuation)))
        {
            warn!("event loop is stopped, completing background events immediately");
            continuation();
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
