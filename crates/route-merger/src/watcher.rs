//! File system watcher for the YAML store directory.
//!
//! Emits the key of every patch whose file was created, modified or
//! removed. Target files are ignored: a target change never requires a
//! patch to be re-applied.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, Debouncer};
use tokio::sync::mpsc;

use crate::resource::ObjectKey;
use crate::store::file::patch_key_for_path;
use crate::store::{Result, StoreError};

const DEBOUNCE: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Watches a store directory and forwards changed patch keys.
pub struct StoreWatcher {
    root: PathBuf,
    sender: mpsc::Sender<ObjectKey>,
    shutdown: Arc<AtomicBool>,
}

impl StoreWatcher {
    pub fn new(root: impl Into<PathBuf>, sender: mpsc::Sender<ObjectKey>) -> Self {
        Self {
            root: root.into(),
            sender,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Watches until [`stop`](Self::stop) is called or the receiver is dropped.
    ///
    /// Blocks the calling thread.
    pub fn watch(&self) -> Result<()> {
        let (tx, rx) = std::sync::mpsc::channel();

        let mut debouncer: Debouncer<RecommendedWatcher> =
            new_debouncer(DEBOUNCE, tx).map_err(|e| StoreError::Watch(e.to_string()))?;

        debouncer
            .watcher()
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| StoreError::Watch(e.to_string()))?;

        log::info!("Started watching store directory: {}", self.root.display());

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(events)) => {
                    for key in self.changed_patches(&events) {
                        log::debug!("Patch file changed: {}", key);
                        if self.sender.blocking_send(key).is_err() {
                            log::info!("Event receiver dropped, stopping watcher");
                            return Ok(());
                        }
                    }
                }
                Ok(Err(e)) => {
                    log::error!("Watch error: {}", e);
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        log::info!("Stopped watching store directory");
        Ok(())
    }

    /// Distinct patch keys touched by a batch of events, in key order.
    fn changed_patches(&self, events: &[DebouncedEvent]) -> BTreeSet<ObjectKey> {
        events
            .iter()
            .filter_map(|event| patch_key_for_path(&self.root, &event.path))
            .collect()
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// Runs a [`StoreWatcher`] on a background thread.
pub struct BackgroundWatcher {
    watcher: Arc<StoreWatcher>,
    handle: Option<std::thread::JoinHandle<Result<()>>>,
}

impl BackgroundWatcher {
    pub fn start(watcher: StoreWatcher) -> Self {
        let watcher = Arc::new(watcher);
        let running = Arc::clone(&watcher);
        let handle = std::thread::spawn(move || running.watch());
        Self {
            watcher,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.watcher.stop();
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(Err(e)) => log::error!("Store watcher failed: {}", e),
                Err(_) => log::error!("Store watcher thread panicked"),
                Ok(Ok(())) => {}
            }
        }
    }
}

impl Drop for BackgroundWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
