//! Shutdown of the event loop.

use super::NetworkManager;
use crate::transport::Inbound;

impl NetworkManager {
    /// Stop the event loop
    ///
    /// Callbacks queued before the call are processed first. Registry entries of
    /// downloads still in flight are kept so the next launch can reconcile them;
    /// their [`PendingTask`](super::PendingTask)s resolve to
    /// [`Error::SessionClosed`](crate::Error::SessionClosed).
    pub async fn shutdown(&self) {
        tracing::info!("shutting down network manager");

        if self.sink.send(Inbound::Shutdown).is_err() {
            tracing::debug!("event loop already stopped");
        }

        let Some(handle) = self.event_loop.lock().await.take() else {
            return;
        };
        match handle.await {
            Ok(()) => tracing::info!("network manager stopped"),
            Err(e) if e.is_panic() => {
                tracing::error!(error = %e, "event loop terminated by a transport contract violation")
            }
            Err(e) => tracing::warn!(error = %e, "event loop did not stop cleanly"),
        }
    }

    /// Whether the event loop is still running
    pub async fn is_running(&self) -> bool {
        match self.event_loop.lock().await.as_ref() {
            Some(handle) => !handle.is_finished(),
            None => false,
        }
    }
}
