//! Download completion observers.

use crate::types::{TaskId, TaskOutcome};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Something that wants to hear about every finished download
///
/// Called from the manager's event loop after the issuing caller received the
/// outcome, including for downloads recovered after a relaunch that no caller is
/// waiting on. Implementations must not wait on the manager's event loop.
#[async_trait]
pub trait DownloadObserver: Send + Sync {
    /// A download produced its terminal outcome
    async fn download_finished(&self, task_id: TaskId, outcome: &TaskOutcome);
}

/// Handle returned by [`NetworkManager::subscribe`](super::NetworkManager::subscribe)
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
}

/// Non-owning list of observers
#[derive(Default)]
pub(crate) struct ObserverList {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Weak<dyn DownloadObserver>)>>,
}

impl ObserverList {
    fn entries(&self) -> std::sync::MutexGuard<'_, Vec<(u64, Weak<dyn DownloadObserver>)>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn subscribe(&self, observer: Weak<dyn DownloadObserver>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries().push((id, observer));
        Subscription { id }
    }

    pub(crate) fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|(id, _)| *id != subscription.id);
        entries.len() != before
    }

    /// Observers still alive, pruning the ones whose owner dropped them
    pub(crate) fn live(&self) -> Vec<Arc<dyn DownloadObserver>> {
        let mut entries = self.entries();
        let mut live = Vec::with_capacity(entries.len());
        entries.retain(|(_, observer)| match observer.upgrade() {
            Some(observer) => {
                live.push(observer);
                true
            }
            None => false,
        });
        live
    }

    pub(crate) fn len(&self) -> usize {
        self.entries().len()
    }

    pub(crate) async fn notify(&self, task_id: TaskId, outcome: &TaskOutcome) {
        for observer in self.live() {
            observer.download_finished(task_id, outcome).await;
        }
    }
}
