//! Common test utilities for background-fetch integration tests

#![allow(dead_code)]

use background_fetch::{
    Config, FetchCoordinator, HttpTransport, NetworkManager, SqliteStore, StateStore,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const DOCUMENT_PATH: &str = "/sample/sample01.json";
pub const LAST_MODIFIED: &str = "Sat, 17 Nov 2018 02:43:26 GMT";
pub const DOCUMENT: &str = r#"{"data":[
    {"date":"20181117114326","title":"first"},
    {"date":"20181201090000","title":"second"},
    {"title":"untimed"}
]}"#;

/// Config pointing at `server`, with every file inside `dir`
pub fn config(server: &MockServer, dir: &TempDir) -> Config {
    Config {
        document_url: format!("{}{}", server.uri(), DOCUMENT_PATH),
        temp_dir: dir.path().join("temp"),
        database_path: dir.path().join("state.db"),
        request_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

/// Serve `body` at the document path
pub async fn serve(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path(DOCUMENT_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Last-Modified", LAST_MODIFIED)
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

/// One application launch
pub struct Launch {
    pub store: StateStore,
    pub sqlite: Arc<SqliteStore>,
    pub manager: Arc<NetworkManager>,
    pub coordinator: Arc<FetchCoordinator>,
}

impl Launch {
    pub async fn start(config: &Config) -> Self {
        let sqlite = Arc::new(SqliteStore::new(&config.database_path).await.unwrap());
        let store = StateStore::new(sqlite.clone());
        let transport = Arc::new(HttpTransport::new(config).unwrap());
        let manager = NetworkManager::start(transport, store.clone(), config)
            .await
            .unwrap();
        let coordinator = FetchCoordinator::new(manager.clone(), store.clone(), config).unwrap();
        Self {
            store,
            sqlite,
            manager,
            coordinator,
        }
    }

    pub async fn stop(self) {
        self.manager.shutdown().await;
        self.sqlite.close().await;
    }
}
