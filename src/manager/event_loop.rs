//! The serialized context all task and registry state is mutated on.

use super::observer::ObserverList;
use crate::registry::TaskRegistry;
use crate::router::{FinishedTask, RouterOutput, SessionRouter};
use crate::transport::Inbound;
use crate::types::TaskKind;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

pub(super) struct EventLoop {
    pub(super) router: SessionRouter,
    pub(super) registry: TaskRegistry,
    pub(super) observers: Arc<ObserverList>,
    pub(super) inbox: mpsc::UnboundedReceiver<Inbound>,
}

impl EventLoop {
    /// Spawn the loop; it ends on [`Inbound::Shutdown`] or once every sender is gone
    pub(super) fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        debug!(tracked = self.router.len(), "event loop started");

        while let Some(message) = self.inbox.recv().await {
            match message {
                Inbound::Track(task) => self.router.track(task),
                Inbound::AwaitDrain(continuation) => {
                    self.router.set_background_completion(continuation)
                }
                Inbound::Session(event) => {
                    let output = self.router.dispatch(event).await;
                    self.handle(output).await;
                }
                Inbound::Shutdown => break,
            }
        }

        debug!(tracked = self.router.len(), "event loop stopped");
    }

    async fn handle(&mut self, output: RouterOutput) {
        match output {
            RouterOutput::Nothing => {}
            RouterOutput::ResponseReceived {
                task_id,
                kind: TaskKind::Download,
                response,
            } => {
                let result = self
                    .registry
                    .update(task_id, move |content| content.response = Some(response))
                    .await;
                if let Err(e) = result {
                    error!(task_id = task_id.get(), error = %e, "failed to persist download response");
                }
            }
            RouterOutput::ResponseReceived { .. } => {}
            RouterOutput::FileStored { task_id, path, ack } => {
                let result = self
                    .registry
                    .update(task_id, move |content| content.temp_file = Some(path))
                    .await;
                match result {
                    Ok(true) => {}
                    Ok(false) => debug!(task_id = task_id.get(), "stored file of a task without registry entry"),
                    Err(e) => {
                        error!(task_id = task_id.get(), error = %e, "failed to persist download file location")
                    }
                }
                // The file is ours now; let the transport delete its copy
                let _ = ack.send(());
            }
            RouterOutput::FileFailed { task_id, error, ack } => {
                // Recorded so a task restored after a relaunch still fails with it
                let result = self
                    .registry
                    .update(task_id, move |content| content.error = Some(error))
                    .await;
                if let Err(e) = result {
                    error!(task_id = task_id.get(), error = %e, "failed to persist download move failure");
                }
                let _ = ack.send(());
            }
            RouterOutput::Finished(finished) => self.finish(finished).await,
        }
    }

    async fn finish(&mut self, mut finished: FinishedTask) {
        let task_id = finished.task_id;

        if finished.kind == TaskKind::Download {
            if let Err(e) = self.registry.remove(task_id).await {
                error!(task_id = task_id.get(), error = %e, "failed to remove finished download from registry");
            }
        }

        if !finished.deliver() {
            debug!(task_id = task_id.get(), "no caller waiting for task outcome");
        }

        if finished.kind == TaskKind::Download {
            self.observers.notify(task_id, &finished.outcome).await;
        }
    }
}
