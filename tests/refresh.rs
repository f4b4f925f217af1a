//! End-to-end refresh tests against a local HTTP server
//!
//! Every test wires the real HTTP transport, the SQLite store, the network manager
//! and the fetch coordinator together, the way a periodic wake does.

mod common;

use background_fetch::{BackgroundFetchHandler, BackgroundFetchResult, FetchResult};
use common::{DOCUMENT, DOCUMENT_PATH, LAST_MODIFIED, Launch};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_refresh_persists_state_and_then_skips() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DOCUMENT_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Last-Modified", LAST_MODIFIED)
                .set_body_string(DOCUMENT),
        )
        .expect(1)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().expect("temp dir");
    let config = common::config(&server, &dir);

    let launch = Launch::start(&config).await;
    assert_eq!(launch.coordinator.fire().await, FetchResult::Success);
    assert_eq!(launch.coordinator.fire().await, FetchResult::Skip);
    launch.stop().await;

    // The Fetch State survives a relaunch
    let launch = Launch::start(&config).await;
    let state = launch
        .coordinator
        .last_fetch_state()
        .await
        .expect("fetch state persisted");
    assert_eq!(state.last_modified, LAST_MODIFIED);
    assert!(state.last_fetch_date.is_some());
    assert!(state.last_fetch_failure_date.is_none());

    let sample = state.sample.expect("sample persisted");
    let titles: Vec<_> = sample.data.iter().filter_map(|d| d.title.as_deref()).collect();
    assert_eq!(titles, vec!["first", "second", "untimed"]);
    assert!(sample.data[2].date.is_none());

    assert_eq!(launch.coordinator.fire().await, FetchResult::Skip);
    assert!(launch.store.download_tasks().await.is_empty());
    launch.stop().await;
}

#[tokio::test]
async fn test_server_error_records_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DOCUMENT_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().expect("temp dir");
    let launch = Launch::start(&common::config(&server, &dir)).await;

    assert_eq!(launch.coordinator.fire().await, FetchResult::Failed);

    let state = launch.store.fetch_state().await.expect("failure recorded");
    assert!(state.last_fetch_failure_date.is_some());
    assert!(state.last_fetch_date.is_none());
    assert!(state.sample.is_none());

    // The failure cool-down holds off the next wake
    assert_eq!(launch.coordinator.fire().await, FetchResult::Skip);
    launch.stop().await;
}

#[tokio::test]
async fn test_unreachable_host_records_failure() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().expect("temp dir");
    let mut config = common::config(&server, &dir);
    config.document_url = "http://127.0.0.1:9/sample.json".to_string();
    let launch = Launch::start(&config).await;

    assert_eq!(launch.coordinator.fire().await, FetchResult::Failed);
    assert!(
        launch
            .store
            .fetch_state()
            .await
            .expect("failure recorded")
            .last_fetch_failure_date
            .is_some()
    );
    launch.stop().await;
}

#[tokio::test]
async fn test_periodic_wake_reports_new_data() {
    let server = MockServer::start().await;
    common::serve(&server, DOCUMENT).await;
    let dir = tempfile::tempdir().expect("temp dir");
    let config = common::config(&server, &dir);
    let launch = Launch::start(&config).await;

    let reported = Arc::new(Mutex::new(Vec::new()));
    let handler = BackgroundFetchHandler::new(launch.coordinator.clone(), config.fetch_deadline);

    let sink = reported.clone();
    let decided = handler
        .perform_fetch(move |result| sink.lock().expect("lock").push(result))
        .await
        .expect("entry point task");
    assert_eq!(decided, Some(BackgroundFetchResult::NewData));

    // A second wake inside the success window reports no data
    let sink = reported.clone();
    let decided = handler
        .perform_fetch(move |result| sink.lock().expect("lock").push(result))
        .await
        .expect("entry point task");
    assert_eq!(decided, Some(BackgroundFetchResult::NoData));

    assert_eq!(
        *reported.lock().expect("lock"),
        vec![BackgroundFetchResult::NewData, BackgroundFetchResult::NoData]
    );
    launch.stop().await;
}

#[tokio::test]
async fn test_slow_server_hits_the_deadline() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DOCUMENT_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Last-Modified", LAST_MODIFIED)
                .set_body_string(DOCUMENT)
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().expect("temp dir");
    let launch = Launch::start(&common::config(&server, &dir)).await;

    let handler = BackgroundFetchHandler::new(launch.coordinator.clone(), Duration::from_millis(50));
    let decided = handler.perform_fetch(|_| {}).await.expect("entry point task");
    assert_eq!(decided, Some(BackgroundFetchResult::NewData));

    // The refresh keeps running past the deadline and still records its result
    let mut recorded = None;
    for _ in 0..100 {
        recorded = launch.store.fetch_state().await;
        if recorded.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let state = recorded.expect("late refresh recorded");
    assert!(state.last_fetch_date.is_some());
    assert_eq!(state.last_modified, LAST_MODIFIED);
    launch.stop().await;
}
