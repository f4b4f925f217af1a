//! Periodic refresh example
//!
//! Simulates one periodic wake:
//! - Loading configuration (optionally from a JSON file given as the first argument)
//! - Recovering download tasks left over from an earlier run
//! - Running the refresh under the wake deadline
//! - Printing the persisted Fetch State
//!
//! Run with `RUST_LOG=background_fetch=debug` to see the task lifecycle.

use background_fetch::{
    BackgroundFetchHandler, Config, FetchCoordinator, HttpTransport, NetworkManager, SqliteStore,
    StateStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_json_file(&PathBuf::from(path)).await?,
        None => Config::default(),
    };

    let store = StateStore::new(Arc::new(SqliteStore::new(&config.database_path).await?));
    let transport = Arc::new(HttpTransport::new(&config)?);
    let manager = NetworkManager::start(transport, store.clone(), &config).await?;
    let coordinator = FetchCoordinator::new(manager.clone(), store, &config)?;

    match coordinator.last_fetch_state().await {
        Some(state) => println!(
            "Previous fetch: success {:?}, failure {:?}",
            state.last_fetch_date, state.last_fetch_failure_date
        ),
        None => println!("No previous fetch recorded"),
    }

    let handler = BackgroundFetchHandler::new(coordinator.clone(), config.fetch_deadline);
    let reported = handler
        .perform_fetch(|result| println!("Completion handler called with {:?}", result))
        .await?;
    println!("Wake reported: {:?}", reported);

    if let Some(state) = coordinator.last_fetch_state().await {
        let records = state.sample.map(|s| s.data.len()).unwrap_or_default();
        println!(
            "Fetch State: {} records, Last-Modified {:?}",
            records, state.last_modified
        );
    }

    manager.shutdown().await;
    Ok(())
}
