//! Background fetch entry point
//!
//! Runs one refresh per periodic wake and reports it to the platform's completion
//! handler exactly once: with the refresh result, or with
//! [`BackgroundFetchResult::NewData`] once the deadline passes, whichever comes first.
//! A refresh that outlives the deadline keeps running so its result still reaches the
//! persisted state.

use crate::coordinator::FetchCoordinator;
use crate::types::{BackgroundFetchResult, FetchResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One refresh attempt
#[async_trait]
pub trait Refresh: Send + Sync + 'static {
    /// Run the refresh to completion
    async fn refresh(&self) -> FetchResult;
}

#[async_trait]
impl Refresh for FetchCoordinator {
    async fn refresh(&self) -> FetchResult {
        self.fire().await
    }
}

type Handler<T> = Box<dyn FnOnce(T) + Send>;

/// Completion handler that runs at most once, whoever calls it first
pub struct OnceCompletion<T> {
    fired: AtomicBool,
    handler: Mutex<Option<Handler<T>>>,
}

impl<T> OnceCompletion<T> {
    /// Guard `handler`
    pub fn new<F>(handler: F) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        Self {
            fired: AtomicBool::new(false),
            handler: Mutex::new(Some(Box::new(handler))),
        }
    }

    /// Run the handler with `value` unless it already ran
    ///
    /// Returns whether this call ran it.
    pub fn complete(&self, value: T) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let handler = self
            .handler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match handler {
            Some(handler) => {
                handler(value);
                true
            }
            None => false,
        }
    }

    /// Whether the handler already ran
    pub fn is_completed(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

/// Periodic-wake handler
pub struct BackgroundFetchHandler<R: Refresh> {
    refresher: Arc<R>,
    deadline: Duration,
}

impl<R: Refresh> BackgroundFetchHandler<R> {
    /// Handler running `refresher`, reporting at the latest after `deadline`
    pub fn new(refresher: Arc<R>, deadline: Duration) -> Self {
        Self {
            refresher,
            deadline,
        }
    }

    /// Start a refresh for a periodic wake
    ///
    /// `completion` is invoked exactly once. The returned handle resolves to the
    /// reported result once it has been decided.
    pub fn perform_fetch<F>(&self, completion: F) -> JoinHandle<Option<BackgroundFetchResult>>
    where
        F: FnOnce(BackgroundFetchResult) + Send + 'static,
    {
        let (decided_tx, decided_rx) = oneshot::channel();
        let guard = Arc::new(OnceCompletion::new(move |result: BackgroundFetchResult| {
            completion(result);
            let _ = decided_tx.send(result);
        }));

        let refresh = {
            let guard = guard.clone();
            let refresher = self.refresher.clone();
            async move {
                let result = BackgroundFetchResult::from(refresher.refresh().await);
                if guard.complete(result) {
                    info!(?result, "background fetch completed");
                } else {
                    debug!(?result, "background fetch finished after the deadline was reported");
                }
            }
        };
        tokio::spawn(refresh);

        let deadline = self.deadline;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if guard.complete(BackgroundFetchResult::NewData) {
                warn!(?deadline, "background fetch deadline reached, reporting new data");
            }
        });

        tokio::spawn(async move {
            let decided = decided_rx.await.ok();
            timer.abort();
            decided
        })
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct DelayedRefresh {
        delay: Duration,
        result: FetchResult,
        finished: AtomicBool,
    }

    impl DelayedRefresh {
        fn new(delay_ms: u64, result: FetchResult) -> Arc<Self> {
            Arc::new(Self {
                delay: Duration::from_millis(delay_ms),
                result,
                finished: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl Refresh for DelayedRefresh {
        async fn refresh(&self) -> FetchResult {
            tokio::time::sleep(self.delay).await;
            self.finished.store(true, Ordering::SeqCst);
            self.result
        }
    }

    fn recording() -> (
        Arc<Mutex<Vec<BackgroundFetchResult>>>,
        impl FnOnce(BackgroundFetchResult) + Send + 'static,
    ) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let inner = calls.clone();
        (calls, move |result| inner.lock().unwrap().push(result))
    }

    #[test]
    fn once_completion_runs_handler_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        let once = OnceCompletion::new(move |n: usize| {
            inner.fetch_add(n, Ordering::SeqCst);
        });

        assert!(!once.is_completed());
        assert!(once.complete(1));
        assert!(!once.complete(10));
        assert!(once.is_completed());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn once_completion_has_a_single_winner_across_threads() {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        let once = Arc::new(OnceCompletion::new(move |_: ()| {
            inner.fetch_add(1, Ordering::SeqCst);
        }));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let once = once.clone();
                std::thread::spawn(move || once.complete(()))
            })
            .collect();
        let winners = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_finishing_first_reports_its_result() {
        let refresher = DelayedRefresh::new(50, FetchResult::Failed);
        let handler = BackgroundFetchHandler::new(refresher.clone(), Duration::from_millis(100));
        let (calls, completion) = recording();

        let decided = handler.perform_fetch(completion).await.unwrap();
        assert_eq!(decided, Some(BackgroundFetchResult::Failed));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(*calls.lock().unwrap(), vec![BackgroundFetchResult::Failed]);
    }

    #[tokio::test]
    async fn deadline_firing_first_reports_new_data_once() {
        let refresher = DelayedRefresh::new(100, FetchResult::Skip);
        let handler = BackgroundFetchHandler::new(refresher.clone(), Duration::from_millis(50));
        let (calls, completion) = recording();

        let decided = handler.perform_fetch(completion).await.unwrap();
        assert_eq!(decided, Some(BackgroundFetchResult::NewData));
        assert!(!refresher.finished.load(Ordering::SeqCst));

        // The refresh is not cancelled by the deadline, and its late result is discarded
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(refresher.finished.load(Ordering::SeqCst));
        assert_eq!(*calls.lock().unwrap(), vec![BackgroundFetchResult::NewData]);
    }

    #[tokio::test]
    async fn skip_maps_to_no_data() {
        let handler =
            BackgroundFetchHandler::new(DelayedRefresh::new(0, FetchResult::Skip), Duration::from_secs(5));
        let (calls, completion) = recording();

        assert_eq!(
            handler.perform_fetch(completion).await.unwrap(),
            Some(BackgroundFetchResult::NoData)
        );
        assert_eq!(*calls.lock().unwrap(), vec![BackgroundFetchResult::NoData]);
    }
}
