
use crate::config::Config;
use crate::manager::{DownloadObserver, NetworkManager};
use crate::store::StateStore;
use crate::test_helpers::ScriptedTransport;
use crate::types::{TaskId, TaskOutcome};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use url::Url;

pub(super) const DOCUMENT: &str = r#"{"data":[{"date":"20181201090000","title":"first"}]}"#;

pub(super) fn document_url() -> Url {
    Url::parse("https://example.com/sample.json").unwrap()
}

pub(super) fn config(dir: &TempDir) -> Config {
    Config {
        temp_dir: dir.path().join("temp"),
        database_path: dir.path().join("state.db"),
        session_identifier: "session".to_string(),
        ..Default::default()
    }
}

pub(super) async fn start(
    transport: ScriptedTransport,
    store: StateStore,
    dir: &TempDir,
) -> (Arc<ScriptedTransport>, Arc<NetworkManager>) {
    let transport = Arc::new(transport);
    let manager = NetworkManager::start(transport.clone(), store, &config(dir))
        .await
        .unwrap();
    (transport, manager)
}

pub(super) fn scripted(dir: &TempDir) -> ScriptedTransport {
    ScriptedTransport::new("session", dir.path().join("staging"))
}

/// Observer recording what it was told, and whether the task's file still existed
#[derive(Default)]
pub(super) struct Recorder {
    pub(super) seen: Mutex<Vec<(TaskId, bool, Option<bool>)>>,
}

#[async_trait]
impl DownloadObserver for Recorder {
    async fn download_finished(&self, task_id: TaskId, outcome: &TaskOutcome) {
        let file_exists = match outcome {
            Ok(crate::types::Payload::File(file)) => Some(file.path().exists()),
            _ => None,
        };
        self.seen
            .lock()
            .unwrap()
            .push((task_id, outcome.is_ok(), file_exists));
    }
}

impl Recorder {
    pub(super) fn seen(&self) -> Vec<(TaskId, bool, Option<bool>)> {
        self.seen.lock().unwrap().clone()
    }
}

/// Wait until `condition` holds, polling the event loop
pub(super) async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
