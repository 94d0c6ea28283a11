//! Controller loop: turns patch keys into reconciliations.
//!
//! Keys arrive from the store watcher. Every patch is also re-enqueued on a
//! fixed interval so a failed reconciliation is retried without a new event.
//! Reconciliations run one at a time, which serializes work per key.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval};

use crate::config::NamespaceFilter;
use crate::context::ReconcileContext;
use crate::error::Result;
use crate::reconciler::{reconcile, ReconcileOutcome, Reconciliation};
use crate::resource::{ObjectKey, RoutePatch};

/// A patch to reconcile, with the snapshot last reconciled for it.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchEvent {
    pub key: ObjectKey,
    pub previous: Option<RoutePatch>,
}

/// Last successfully reconciled snapshot per patch.
///
/// Kept in memory only; after a restart the first reconciliation of each
/// patch runs without a previous snapshot.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    snapshots: HashMap<ObjectKey, RoutePatch>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ObjectKey) -> Option<&RoutePatch> {
        self.snapshots.get(key)
    }

    /// Builds the event for `key` from the cached snapshot.
    pub fn event_for(&self, key: &ObjectKey) -> PatchEvent {
        PatchEvent {
            key: key.clone(),
            previous: self.snapshots.get(key).cloned(),
        }
    }

    /// Stores `observed`, or forgets the key when there is nothing to keep.
    pub fn record(&mut self, key: &ObjectKey, observed: Option<RoutePatch>) {
        match observed {
            Some(snapshot) => {
                self.snapshots.insert(key.clone(), snapshot);
            }
            None => {
                self.snapshots.remove(key);
            }
        }
    }

    /// Drops every entry whose key is not in `live`.
    pub fn retain_live(&mut self, live: &BTreeSet<ObjectKey>) -> usize {
        let before = self.snapshots.len();
        self.snapshots.retain(|key, _| live.contains(key));
        before - self.snapshots.len()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

/// Counts from one full resync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncSummary {
    pub reconciled: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Listed, but gone by the time it was read.
    pub vanished: usize,
}

pub struct Controller {
    ctx: ReconcileContext,
    namespaces: NamespaceFilter,
    resync_interval: Option<Duration>,
    cache: SnapshotCache,
}

impl Controller {
    pub fn new(ctx: ReconcileContext) -> Self {
        Self {
            ctx,
            namespaces: NamespaceFilter::default(),
            resync_interval: None,
            cache: SnapshotCache::new(),
        }
    }

    pub fn with_namespaces(mut self, namespaces: NamespaceFilter) -> Self {
        self.namespaces = namespaces;
        self
    }

    pub fn with_resync_interval(mut self, interval: Option<Duration>) -> Self {
        self.resync_interval = interval;
        self
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    /// Reconciles one patch. Returns `Ok(None)` for namespaces not watched.
    pub async fn handle(&mut self, key: &ObjectKey) -> Result<Option<Reconciliation>> {
        if !self.namespaces.watches(&key.namespace) {
            tracing::trace!(patch = %key, "Namespace not watched, ignoring");
            return Ok(None);
        }

        let event = self.cache.event_for(key);
        self.handle_event(event).await.map(Some)
    }

    /// Reconciles one event and records the observed snapshot on success.
    pub async fn handle_event(&mut self, event: PatchEvent) -> Result<Reconciliation> {
        let done = reconcile(&self.ctx, &event.key, event.previous.as_ref()).await?;
        self.cache.record(&event.key, done.observed.clone());
        Ok(done)
    }

    /// Reconciles every watched patch in the store.
    pub async fn resync(&mut self) -> Result<ResyncSummary> {
        let patches = self.ctx.store().list_patches().await?;
        let keys: BTreeSet<ObjectKey> = patches.iter().map(RoutePatch::key).collect();

        let forgotten = self.cache.retain_live(&keys);
        if forgotten > 0 {
            tracing::debug!(forgotten, "Dropped snapshots of removed patches");
        }

        let mut summary = ResyncSummary::default();
        for key in &keys {
            match self.handle(key).await {
                Ok(Some(done)) if done.outcome == ReconcileOutcome::PatchGone => {
                    tracing::warn!(patch = %key, "Listed patch could not be read back");
                    summary.vanished += 1;
                }
                Ok(Some(_)) => summary.reconciled += 1,
                Ok(None) => summary.skipped += 1,
                // already logged by the reconciler
                Err(_) => summary.failed += 1,
            }
        }

        tracing::info!(
            reconciled = summary.reconciled,
            failed = summary.failed,
            skipped = summary.skipped,
            vanished = summary.vanished,
            "Resync complete"
        );
        Ok(summary)
    }

    /// Processes events until shutdown is signalled or the event channel closes.
    ///
    /// Runs a full resync on start, then on every interval tick and every
    /// manual trigger.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<ObjectKey>,
        mut triggers: mpsc::Receiver<()>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!(
            namespaces = %self.namespaces,
            resync_secs = self.resync_interval.map(|d| d.as_secs()),
            "Controller started"
        );

        self.resync_logged().await;

        let mut timer = self
            .resync_interval
            .map(|period| tokio::time::interval_at(Instant::now() + period, period));

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                key = events.recv() => match key {
                    Some(key) => {
                        // errors were logged by the reconciler; the next resync retries
                        let _ = self.handle(&key).await;
                    }
                    None => {
                        tracing::info!("Event channel closed");
                        break;
                    }
                },
                Some(()) = triggers.recv() => {
                    tracing::info!("Manual resync triggered");
                    self.resync_logged().await;
                }
                _ = tick(&mut timer) => {
                    self.resync_logged().await;
                }
            }
        }

        tracing::info!("Controller stopped");
    }

    async fn resync_logged(&mut self) {
        if let Err(e) = self.resync().await {
            tracing::error!(error = %e, "Resync failed to list patches");
        }
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
