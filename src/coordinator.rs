//! Fetch coordinator
//!
//! Decides whether a refresh is due, downloads the document, and records the
//! outcome in the persisted [`FetchState`] the next decision is based on.
//!
//! The outcome is processed in the coordinator's [`DownloadObserver`] callback rather
//! than by the caller of [`FetchCoordinator::fire`]: a download recovered after a
//! relaunch has no caller, but must still update the Fetch State.

use crate::config::Config;
use crate::document::{Sample, decode_document};
use crate::error::{Error, Result};
use crate::manager::{DownloadObserver, NetworkManager, Subscription};
use crate::store::StateStore;
use crate::types::{DownloadedFile, FetchResult, Payload, TaskId, TaskOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, error, info, warn};
use url::Url;

/// Persisted record of the last fetch attempt
///
/// Every attempt replaces the whole record: a success carries the document and its
/// success timestamp, a failure only its failure timestamp.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchState {
    /// `Last-Modified` header of the fetched document, verbatim
    #[serde(default)]
    pub last_modified: String,
    /// The fetched document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample: Option<Sample>,
    /// When the last successful fetch finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fetch_date: Option<DateTime<Utc>>,
    /// When the last failed fetch finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fetch_failure_date: Option<DateTime<Utc>>,
}

/// Cool-down windows between fetch attempts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CooldownPolicy {
    /// Window after a success
    pub success: Duration,
    /// Window after a failure
    pub failure: Duration,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            success: Duration::from_secs(24 * 60 * 60),
            failure: Duration::from_secs(5 * 60),
        }
    }
}

impl CooldownPolicy {
    /// Windows configured in `config`
    pub fn from_config(config: &Config) -> Self {
        Self {
            success: config.success_cooldown,
            failure: config.failure_cooldown,
        }
    }
}

/// Whether `now` is strictly after `then` and strictly within `window` of it
///
/// A clock that moved backwards is outside every window.
fn within_window(now: DateTime<Utc>, then: DateTime<Utc>, window: Duration) -> bool {
    match (now - then).to_std() {
        Ok(elapsed) => !elapsed.is_zero() && elapsed < window,
        Err(_) => false,
    }
}

impl FetchState {
    /// Record of a successful fetch at `at`
    pub fn succeeded(sample: Sample, last_modified: String, at: DateTime<Utc>) -> Self {
        Self {
            last_modified,
            sample: Some(sample),
            last_fetch_date: Some(at),
            last_fetch_failure_date: None,
        }
    }

    /// Record of a failed fetch at `at`
    pub fn failed(at: DateTime<Utc>) -> Self {
        Self {
            last_fetch_failure_date: Some(at),
            ..Default::default()
        }
    }

    /// Whether a fetch is due at `now`
    pub fn needs_fetch(&self, now: DateTime<Utc>, policy: &CooldownPolicy) -> bool {
        if let Some(last) = self.last_fetch_date {
            if within_window(now, last, policy.success) {
                debug!(last_fetch_date = %last, "within success cool-down");
                return false;
            }
        }
        if let Some(last) = self.last_fetch_failure_date {
            if within_window(now, last, policy.failure) {
                debug!(last_fetch_failure_date = %last, "within failure cool-down");
                return false;
            }
        }
        true
    }
}

/// Top-level refresh policy
pub struct FetchCoordinator {
    manager: Arc<NetworkManager>,
    store: StateStore,
    document_url: Url,
    policy: CooldownPolicy,
    waiters: Mutex<HashMap<TaskId, oneshot::Sender<FetchResult>>>,
    subscription: std::sync::Mutex<Option<Subscription>>,
}

impl FetchCoordinator {
    /// Create a coordinator and subscribe it to `manager`'s downloads
    ///
    /// It unsubscribes itself when dropped.
    pub fn new(
        manager: Arc<NetworkManager>,
        store: StateStore,
        config: &Config,
    ) -> Result<Arc<Self>> {
        let document_url = Url::parse(&config.document_url)?;
        let coordinator = Arc::new(Self {
            manager,
            store,
            document_url,
            policy: CooldownPolicy::from_config(config),
            waiters: Mutex::new(HashMap::new()),
            subscription: std::sync::Mutex::new(None),
        });

        let observer = Arc::downgrade(&coordinator);
        let observer: Weak<dyn DownloadObserver> = observer;
        let subscription = coordinator.manager.subscribe(observer);
        *coordinator
            .subscription
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(subscription);

        Ok(coordinator)
    }

    /// The persisted Fetch State, if any
    pub async fn last_fetch_state(&self) -> Option<FetchState> {
        self.store.fetch_state().await
    }

    /// Whether a fetch is due at `now`
    pub async fn check_fetch_need(&self, now: DateTime<Utc>) -> bool {
        match self.store.fetch_state().await {
            Some(state) => state.needs_fetch(now, &self.policy),
            None => true,
        }
    }

    /// Run one refresh
    ///
    /// Returns [`FetchResult::Skip`] without touching the network while a cool-down
    /// is active. Otherwise downloads the document and returns once the Fetch State
    /// has been updated.
    pub async fn fire(&self) -> FetchResult {
        if !self.check_fetch_need(Utc::now()).await {
            info!("refresh not due, skipping");
            return FetchResult::Skip;
        }

        // Holding the table while issuing keeps the observer from seeing the outcome first
        let issued = {
            let mut waiters = self.waiters.lock().await;
            match self.manager.download(&self.document_url).await {
                Ok(task) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.insert(task.id(), tx);
                    Ok((task, rx))
                }
                Err(e) => Err(e),
            }
        };

        let (task, rx) = match issued {
            Ok(issued) => issued,
            Err(e) => {
                error!(error = %e, "failed to issue refresh download");
                return self.fail().await;
            }
        };

        // The caller is completed before observers, so a delivered outcome means the
        // observer result follows; a closed session means it never will
        let task_id = task.id();
        if let Err(e) = task.outcome().await {
            warn!(task_id = task_id.get(), error = %e, "network manager stopped before the refresh finished");
            self.waiters.lock().await.remove(&task_id);
            return self.fail().await;
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => {
                warn!(task_id = task_id.get(), "refresh result was dropped");
                self.fail().await
            }
        }
    }

    async fn fail(&self) -> FetchResult {
        self.save(FetchState::failed(Utc::now())).await;
        FetchResult::Failed
    }

    async fn process(&self, outcome: &TaskOutcome) -> FetchResult {
        let parsed = match outcome {
            Ok(Payload::File(file)) => self.parse_file(file).await,
            Ok(Payload::Data { .. }) => Err(Error::Decode("expected a downloaded file".to_string())),
            Err(e) => {
                warn!(error = %e, "refresh download failed");
                return self.fail().await;
            }
        };

        match parsed {
            Ok((sample, last_modified)) => {
                info!(records = sample.data.len(), last_modified = %last_modified, "refresh succeeded");
                self.save(FetchState::succeeded(sample, last_modified, Utc::now())).await;
                FetchResult::Success
            }
            Err(e) => {
                warn!(error = %e, "downloaded document could not be decoded");
                self.fail().await
            }
        }
    }

    async fn parse_file(&self, file: &DownloadedFile) -> Result<(Sample, String)> {
        let response = file
            .response
            .as_ref()
            .ok_or_else(|| Error::Decode("download finished without a response".to_string()))?;
        let body = tokio::fs::read(file.path()).await?;
        let sample = decode_document(&body)?;
        Ok((sample, response.last_modified.clone().unwrap_or_default()))
    }

    async fn save(&self, state: FetchState) {
        if let Err(e) = self.store.set_fetch_state(&state).await {
            error!(error = %e, "failed to persist fetch state");
        } else {
            debug!(?state, "persisted fetch state");
        }
    }
}

#[async_trait]
impl DownloadObserver for FetchCoordinator {
    async fn download_finished(&self, task_id: TaskId, outcome: &TaskOutcome) {
        let result = self.process(outcome).await;
        match self.waiters.lock().await.remove(&task_id) {
            Some(waiter) => {
                let _ = waiter.send(result);
            }
            None => debug!(task_id = task_id.get(), ?result, "recorded refresh nobody was waiting for"),
        }
    }
}

impl Drop for FetchCoordinator {
    fn drop(&mut self) {
        let subscription = self
            .subscription
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(subscription) = subscription {
            self.manager.unsubscribe(&subscription);
        }
    }
}
