use std::process::ExitCode;
use std::sync::Arc;

use log::info;
use tokio::sync::{mpsc, watch};

use route_merger::telemetry::init_logging;
use route_merger::{
    BackgroundWatcher, Controller, EngineConfig, FileStore, ReconcileContext, StoreWatcher,
};

const EVENT_QUEUE_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("route-merger: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.log) {
        eprintln!("route-merger: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Starting route-merger v{}", env!("CARGO_PKG_VERSION"));

    let store = match FileStore::open(&config.store_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            log::error!("Failed to open store: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("Using store directory: {}", store.root().display());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(true);
    }) {
        log::error!("Failed to install Ctrl-C handler: {}", e);
        return ExitCode::FAILURE;
    }

    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    // held open so the controller keeps running without manual triggers
    let (_trigger_tx, trigger_rx) = mpsc::channel(1);

    let mut watcher = BackgroundWatcher::start(StoreWatcher::new(store.root(), event_tx));

    let ctx = ReconcileContext::from_config(store, &config);
    let controller = Controller::new(ctx)
        .with_namespaces(config.namespaces.clone())
        .with_resync_interval(config.resync_interval);

    controller.run(event_rx, trigger_rx, shutdown_rx).await;

    watcher.stop();
    info!("Shutdown complete");
    ExitCode::SUCCESS
}
