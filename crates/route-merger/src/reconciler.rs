//! Reconciliation driver.
//!
//! One call handles one patch: migrate off a previous target, run the
//! finalizer protocol, apply defaults, then merge the routes into the target
//! if the spec changed since it was last handled.

use std::time::Instant;

use tracing::Instrument;

use crate::context::ReconcileContext;
use crate::error::Result;
use crate::finalizer::{self, FinalizerStep};
use crate::merge::MergeOutcome;
use crate::migration::{migrate_if_target_changed, Migration};
use crate::resource::{ObjectKey, RoutePatch};
use crate::revision;
use crate::sync::{sync_target, TargetOp};

/// What one reconciliation did.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// The patch no longer exists.
    PatchGone,
    /// The finalizer marker was added; routes are synced on the next run.
    FinalizerAdded,
    /// Defaults were written back; routes are synced on the next run.
    Defaulted,
    /// Deletion cleanup ran and the marker was removed.
    Finalized { target: ObjectKey, target_found: bool },
    /// Deletion was requested and nothing is left to do.
    Released,
    /// Routes were applied. `outcome` is `None` when the target does not exist.
    Synced {
        target: ObjectKey,
        outcome: Option<MergeOutcome>,
    },
    /// The current revision was already handled.
    UpToDate,
}

impl std::fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileOutcome::PatchGone => write!(f, "patch gone"),
            ReconcileOutcome::FinalizerAdded => write!(f, "finalizer added"),
            ReconcileOutcome::Defaulted => write!(f, "defaults applied"),
            ReconcileOutcome::Finalized {
                target,
                target_found: true,
            } => write!(f, "finalized, routes withdrawn from {}", target),
            ReconcileOutcome::Finalized { .. } => write!(f, "finalized, target missing"),
            ReconcileOutcome::Released => write!(f, "released"),
            ReconcileOutcome::Synced {
                target,
                outcome: Some(outcome),
            } => write!(f, "synced to {} ({})", target, outcome),
            ReconcileOutcome::Synced { target, outcome: None } => {
                write!(f, "target {} not found", target)
            }
            ReconcileOutcome::UpToDate => write!(f, "up to date"),
        }
    }
}

/// Result of a successful reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub outcome: ReconcileOutcome,
    pub migration: Migration,
    /// The patch as last written or read by this run. `None` once the patch
    /// is gone or its deletion was handled.
    pub observed: Option<RoutePatch>,
}

impl Reconciliation {
    fn new(outcome: ReconcileOutcome, migration: Migration, observed: Option<RoutePatch>) -> Self {
        Self {
            outcome,
            migration,
            observed,
        }
    }
}

/// Reconciles the patch at `key`.
///
/// `previous` is the last snapshot of the patch that was reconciled
/// successfully, if known. Errors carry the patch key.
pub async fn reconcile(
    ctx: &ReconcileContext,
    key: &ObjectKey,
    previous: Option<&RoutePatch>,
) -> Result<Reconciliation> {
    let span = tracing::info_span!("reconcile", patch = %key);

    async move {
        let start = Instant::now();
        tracing::debug!("Reconciliation started");

        let result = run(ctx, key, previous).await.map_err(|e| e.in_patch(key));
        let elapsed_ms = elapsed_millis(start);

        match &result {
            Ok(done) => {
                tracing::info!(outcome = %done.outcome, elapsed_ms, "Reconciliation complete")
            }
            Err(e) => tracing::error!(
                error = %e,
                kind = %e.kind(),
                retryable = e.is_retryable(),
                elapsed_ms,
                "Reconciliation failed"
            ),
        }
        result
    }
    .instrument(span)
    .await
}

/// Milliseconds since `start`, saturating at `u64::MAX`.
fn elapsed_millis(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

async fn run(
    ctx: &ReconcileContext,
    key: &ObjectKey,
    previous: Option<&RoutePatch>,
) -> Result<Reconciliation> {
    let patch = match ctx.store().get_patch(key).await {
        Ok(patch) => patch,
        Err(e) if e.is_not_found() => {
            tracing::debug!("Patch no longer exists");
            return Ok(Reconciliation::new(
                ReconcileOutcome::PatchGone,
                Migration::Unchanged,
                None,
            ));
        }
        Err(e) => return Err(e.into()),
    };

    let migration = match previous {
        Some(previous) => migrate_if_target_changed(ctx, previous, &patch).await?,
        None => Migration::Unchanged,
    };

    match finalizer::advance(ctx, &patch).await? {
        FinalizerStep::MarkerAdded(written) => {
            return Ok(Reconciliation::new(
                ReconcileOutcome::FinalizerAdded,
                migration,
                Some(written),
            ));
        }
        FinalizerStep::Finalized {
            target,
            target_found,
        } => {
            return Ok(Reconciliation::new(
                ReconcileOutcome::Finalized {
                    target,
                    target_found,
                },
                migration,
                None,
            ));
        }
        FinalizerStep::Released => {
            return Ok(Reconciliation::new(
                ReconcileOutcome::Released,
                migration,
                None,
            ));
        }
        FinalizerStep::Proceed => {}
    }

    let mut patch = patch;
    if ctx.handling().apply_defaults(&mut patch) {
        let written = ctx.store().update_patch(&patch).await?;
        tracing::info!("Applied defaults to patch");
        return Ok(Reconciliation::new(
            ReconcileOutcome::Defaulted,
            migration,
            Some(written),
        ));
    }

    if !revision::needs_sync(&patch) {
        tracing::debug!(revision = patch.revision(), "Revision already handled");
        return Ok(Reconciliation::new(
            ReconcileOutcome::UpToDate,
            migration,
            Some(patch),
        ));
    }

    let target = patch.target_key();
    let outcome = match sync_target(ctx, &patch, TargetOp::Apply).await {
        Ok((_, outcome)) => Some(outcome),
        Err(e) if e.is_not_found() => {
            tracing::info!(target = %target, "Target not found, nothing to sync");
            None
        }
        Err(e) => return Err(e),
    };

    revision::mark_handled(&mut patch);
    let written = ctx.store().update_patch_status(&patch).await?;

    Ok(Reconciliation::new(
        ReconcileOutcome::Synced { target, outcome },
        migration,
        Some(written),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaulting::pin_target_namespace;
    use crate::error::ErrorKind;
    use crate::finalizer::DEFAULT_FINALIZER;
    use crate::resource::{HttpRoute, RouteTarget, TargetRef};
    use crate::store::{MemoryStore, ResourceStore, StoreError};
    use std::sync::Arc;

    fn guarded_patch(target: &str) -> RoutePatch {
        let mut patch = RoutePatch::patch("team-a", "p1", TargetRef::new(target));
        patch.metadata.finalizers.push(DEFAULT_FINALIZER.to_string());
        patch
            .spec
            .http
            .push(HttpRoute::prefix("api", "/api", "api.svc"));
        patch
    }

    async fn setup() -> (Arc<MemoryStore>, ReconcileContext) {
        let store = Arc::new(MemoryStore::new());
        store
            .create_target(RouteTarget::target("team-a", "svc-a"))
            .await
            .unwrap();
        let ctx = ReconcileContext::new(store.clone());
        (store, ctx)
    }

    fn key() -> ObjectKey {
        ObjectKey::new("team-a", "p1")
    }

    #[test]
    fn test_elapsed_millis() {
        let start = Instant::now() - std::time::Duration::from_millis(25);
        let elapsed = elapsed_millis(start);
        assert!(elapsed >= 25);
        assert!(elapsed < 60_000);
    }

    #[tokio::test]
    async fn test_missing_patch_is_gone() {
        let (_store, ctx) = setup().await;
        let done = reconcile(&ctx, &key(), None).await.unwrap();
        assert_eq!(done.outcome, ReconcileOutcome::PatchGone);
        assert!(done.observed.is_none());
    }

    #[tokio::test]
    async fn test_sync_then_up_to_date() {
        let (store, ctx) = setup().await;
        store.create_patch(guarded_patch("svc-a")).await.unwrap();

        let first = reconcile(&ctx, &key(), None).await.unwrap();
        assert!(matches!(
            first.outcome,
            ReconcileOutcome::Synced { outcome: Some(_), .. }
        ));
        let observed = first.observed.unwrap();
        assert_eq!(observed.handled_revision(), Some(observed.revision()));

        let second = reconcile(&ctx, &key(), Some(&observed)).await.unwrap();
        assert_eq!(second.outcome, ReconcileOutcome::UpToDate);
        assert_eq!(second.migration, Migration::Unchanged);
    }

    #[tokio::test]
    async fn test_invalid_patch_fails_with_validation() {
        let (store, ctx) = setup().await;
        let mut patch = guarded_patch("svc-a");
        patch.spec.http.push(HttpRoute::default());
        store.create_patch(patch).await.unwrap();

        let err = reconcile(&ctx, &key(), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.is_retryable());
        assert!(err.to_string().starts_with("RoutePatch 'team-a/p1'"));
        assert_eq!(store.get_patch(&key()).await.unwrap().handled_revision(), None);
    }

    #[tokio::test]
    async fn test_write_failure_is_retryable_and_leaves_revision_unhandled() {
        let (store, ctx) = setup().await;
        store.create_patch(guarded_patch("svc-a")).await.unwrap();
        store
            .fail_next_write(StoreError::Unavailable("connection reset".to_string()))
            .await;

        let err = reconcile(&ctx, &key(), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.is_retryable());
        assert_eq!(store.get_patch(&key()).await.unwrap().handled_revision(), None);

        let done = reconcile(&ctx, &key(), None).await.unwrap();
        assert!(matches!(done.outcome, ReconcileOutcome::Synced { .. }));
    }

    #[tokio::test]
    async fn test_defaulting_hook_writes_and_stops() {
        let (store, ctx) = setup().await;
        let ctx = ctx.with_defaulting(pin_target_namespace);
        store.create_patch(guarded_patch("svc-a")).await.unwrap();

        let done = reconcile(&ctx, &key(), None).await.unwrap();
        assert_eq!(done.outcome, ReconcileOutcome::Defaulted);
        let stored = store.get_patch(&key()).await.unwrap();
        assert_eq!(stored.spec.target.namespace, "team-a");
        assert!(store
            .get_target(&ObjectKey::new("team-a", "svc-a"))
            .await
            .unwrap()
            .spec
            .http
            .is_empty());

        let done = reconcile(&ctx, &key(), None).await.unwrap();
        assert!(matches!(done.outcome, ReconcileOutcome::Synced { .. }));
    }

    #[test]
    fn test_outcome_display() {
        let outcome = ReconcileOutcome::Synced {
            target: ObjectKey::new("team-a", "svc-a"),
            outcome: None,
        };
        assert_eq!(outcome.to_string(), "target team-a/svc-a not found");
        assert_eq!(ReconcileOutcome::UpToDate.to_string(), "up to date");
    }
}
