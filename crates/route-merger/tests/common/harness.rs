//! Test harness around a `MemoryStore`.
//!
//! The `TestHarness` owns the store and a reconcile context and plays the
//! part of the event source: it remembers the snapshot of every patch it
//! reconciled successfully and hands it back as `previous`.

#![allow(dead_code)]

use std::sync::Arc;

use route_merger::resource::NamedRoute;
use route_merger::{
    reconcile, MemoryStore, ObjectKey, ReconcileContext, ReconcileOutcome, Reconciliation,
    ResourceStore, Result, RoutePatch, RouteTarget, SnapshotCache,
};

/// Upper bound on reconciliations before a patch must have settled.
const MAX_ROUNDS: usize = 5;

pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub ctx: ReconcileContext,
    snapshots: SnapshotCache,
}

impl TestHarness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let ctx = ReconcileContext::new(store.clone());
        Self {
            store,
            ctx,
            snapshots: SnapshotCache::new(),
        }
    }

    /// Replaces the context, keeping the store.
    pub fn with_context<F>(mut self, configure: F) -> Self
    where
        F: FnOnce(ReconcileContext) -> ReconcileContext,
    {
        self.ctx = configure(self.ctx);
        self
    }

    pub async fn add_target(&self, target: RouteTarget) -> ObjectKey {
        self.store.create_target(target).await.unwrap().key()
    }

    pub async fn add_patch(&self, patch: RoutePatch) -> ObjectKey {
        self.store.create_patch(patch).await.unwrap().key()
    }

    /// Reconciles once, supplying the remembered snapshot.
    pub async fn reconcile(&mut self, key: &ObjectKey) -> Result<Reconciliation> {
        let event = self.snapshots.event_for(key);
        self.reconcile_with(key, event.previous.as_ref()).await
    }

    /// Reconciles once with an explicit previous snapshot.
    pub async fn reconcile_with(
        &mut self,
        key: &ObjectKey,
        previous: Option<&RoutePatch>,
    ) -> Result<Reconciliation> {
        let done = reconcile(&self.ctx, key, previous).await?;
        self.snapshots.record(key, done.observed.clone());
        Ok(done)
    }

    /// Reconciles until a run changes nothing. Returns every outcome seen.
    pub async fn settle(&mut self, key: &ObjectKey) -> Vec<ReconcileOutcome> {
        let mut outcomes = Vec::new();
        for _ in 0..MAX_ROUNDS {
            let done = self.reconcile(key).await.unwrap();
            let settled = matches!(
                done.outcome,
                ReconcileOutcome::UpToDate | ReconcileOutcome::PatchGone
            );
            outcomes.push(done.outcome);
            if settled {
                return outcomes;
            }
        }
        panic!("patch {} did not settle: {:?}", key, outcomes);
    }

    pub fn snapshot(&self, key: &ObjectKey) -> Option<RoutePatch> {
        self.snapshots.get(key).cloned()
    }

    pub async fn patch(&self, key: &ObjectKey) -> RoutePatch {
        self.store.get_patch(key).await.unwrap()
    }

    pub async fn target(&self, key: &ObjectKey) -> RouteTarget {
        self.store.get_target(key).await.unwrap()
    }

    /// Names of the target's HTTP entries, in order.
    pub async fn http_names(&self, key: &ObjectKey) -> Vec<String> {
        self.target(key)
            .await
            .spec
            .http
            .iter()
            .map(|r| r.name().to_string())
            .collect()
    }
}
