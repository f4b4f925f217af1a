//! # background-fetch
//!
//! Periodic background refresh of a remote document, built to survive the process
//! being killed and relaunched while a download is still in flight.
//!
//! ## Design
//!
//! - **One outcome per task** - every issued transfer completes exactly once, even if
//!   the process died in between and the transport resumed it on relaunch
//! - **Serialized state** - task, registry and observer state is only touched on the
//!   manager's event loop; transport callbacks are queued onto it
//! - **Fail-open persistence** - corrupt persisted state reads as absent
//! - **Exactly-once reporting** - the platform's completion handler runs once, with
//!   the refresh result or on deadline
//!
//! ## Quick Start
//!
//! ```no_run
//! use background_fetch::{
//!     BackgroundFetchHandler, Config, FetchCoordinator, HttpTransport, NetworkManager,
//!     SqliteStore, StateStore,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let store = StateStore::new(Arc::new(SqliteStore::new(&config.database_path).await?));
//!     let transport = Arc::new(HttpTransport::new(&config)?);
//!
//!     let manager = NetworkManager::start(transport, store.clone(), &config).await?;
//!     let coordinator = FetchCoordinator::new(manager.clone(), store, &config)?;
//!
//!     let handler = BackgroundFetchHandler::new(coordinator, config.fetch_deadline);
//!     handler
//!         .perform_fetch(|result| println!("background fetch: {:?}", result))
//!         .await?;
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Fetch coordinator and persisted fetch state
pub mod coordinator;
/// Refreshed document format
pub mod document;
/// Periodic-wake entry point
pub mod entry;
/// Error types
pub mod error;
/// Network manager and download observers
pub mod manager;
/// Persistent registry of outstanding downloads
pub mod registry;
/// Session event routing
pub mod router;
/// Persisted key/value state
pub mod store;
/// Transport task wrapper
pub mod task;
/// Network session boundary
pub mod transport;
/// Core types
pub mod types;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use config::Config;
pub use coordinator::{CooldownPolicy, FetchCoordinator, FetchState};
pub use document::{Sample, SampleData};
pub use entry::{BackgroundFetchHandler, OnceCompletion, Refresh};
pub use error::{Error, Result, StoreError, TransportError};
pub use manager::{DownloadObserver, NetworkManager, PendingTask, Subscription};
pub use registry::{DownloadContent, TaskRegistry};
pub use store::{MemoryStore, PersistedStore, SqliteStore, StateStore};
pub use transport::{EventSink, HttpTransport, LiveTask, SessionEvent, Transport};
pub use types::{
    BackgroundFetchResult, DownloadedFile, FetchResult, Payload, ResponseMetadata, TaskId,
    TaskKey, TaskKind, TaskOutcome,
};

/// Run until a termination signal arrives, then shut the manager down.
///
/// - **Unix:** listens for SIGTERM and SIGINT, falling back to Ctrl+C if registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// In-flight downloads keep their registry entries and are reconciled on the next
/// [`NetworkManager::start`].
pub async fn run_with_shutdown(manager: std::sync::Arc<NetworkManager>) {
    wait_for_signal().await;
    manager.shutdown().await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
    }
}
