//! Finalizer protocol.
//!
//! A patch carries a finalizer marker for as long as it may have routes on a
//! target. The store refuses to erase an object whose finalizer list is not
//! empty, so the marker is removed only after the patch's routes have been
//! withdrawn.

use crate::context::ReconcileContext;
use crate::error::Result;
use crate::resource::{ObjectKey, ObjectMeta, RoutePatch};
use crate::sync::{sync_target, TargetOp};

/// Marker used when none is configured.
pub const DEFAULT_FINALIZER: &str = "routemerger.io/finalizer";

/// Where a patch stands with respect to its finalizer marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizerState {
    /// Live, marker not yet added.
    MissingMarker,
    /// Live, marker present.
    Active,
    /// Deletion requested, cleanup still pending.
    Deleting,
    /// Deletion requested, nothing left for this controller to do.
    Released,
}

/// Result of running the protocol once.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalizerStep {
    /// The marker was added and persisted. Nothing else may run this time.
    MarkerAdded(RoutePatch),
    /// The patch is live and guarded; normal sync may proceed.
    Proceed,
    /// Routes were withdrawn and the marker removed.
    Finalized { target: ObjectKey, target_found: bool },
    /// Deletion was already handled.
    Released,
}

pub fn classify(meta: &ObjectMeta, marker: &str) -> FinalizerState {
    match (meta.is_being_deleted(), has_marker(meta, marker)) {
        (false, false) => FinalizerState::MissingMarker,
        (false, true) => FinalizerState::Active,
        (true, true) => FinalizerState::Deleting,
        (true, false) => FinalizerState::Released,
    }
}

/// Whether any finalizer starts with `marker`.
pub fn has_marker(meta: &ObjectMeta, marker: &str) -> bool {
    meta.finalizers.iter().any(|f| f.starts_with(marker))
}

/// Adds `marker` unless a matching one is present. Returns true if added.
pub fn add_marker(meta: &mut ObjectMeta, marker: &str) -> bool {
    if has_marker(meta, marker) {
        return false;
    }
    meta.finalizers.push(marker.to_string());
    true
}

/// Removes every finalizer starting with `marker`. Returns how many were removed.
pub fn remove_marker(meta: &mut ObjectMeta, marker: &str) -> usize {
    let before = meta.finalizers.len();
    meta.finalizers.retain(|f| !f.starts_with(marker));
    before - meta.finalizers.len()
}

/// Runs the transition that applies to the patch's current state.
pub async fn advance(ctx: &ReconcileContext, patch: &RoutePatch) -> Result<FinalizerStep> {
    match classify(&patch.metadata, ctx.finalizer()) {
        FinalizerState::MissingMarker => {
            let mut guarded = patch.clone();
            add_marker(&mut guarded.metadata, ctx.finalizer());
            let written = ctx.store().update_patch(&guarded).await?;
            tracing::info!(finalizer = ctx.finalizer(), "Added finalizer to patch");
            Ok(FinalizerStep::MarkerAdded(written))
        }
        FinalizerState::Active => Ok(FinalizerStep::Proceed),
        FinalizerState::Deleting => finalize(ctx, patch).await,
        FinalizerState::Released => Ok(FinalizerStep::Released),
    }
}

async fn finalize(ctx: &ReconcileContext, patch: &RoutePatch) -> Result<FinalizerStep> {
    let target = patch.target_key();
    let target_found = match sync_target(ctx, patch, TargetOp::Withdraw).await {
        Ok((_, outcome)) => {
            tracing::info!(target = %target, %outcome, "Withdrew routes of deleted patch");
            true
        }
        Err(e) if e.is_not_found() => {
            tracing::info!(target = %target, "Target not found, nothing to clean up");
            false
        }
        Err(e) => return Err(e),
    };

    let mut released = patch.clone();
    remove_marker(&mut released.metadata, ctx.finalizer());
    ctx.store().update_patch(&released).await?;
    tracing::info!(finalizer = ctx.finalizer(), "Removed finalizer from patch");

    Ok(FinalizerStep::Finalized {
        target,
        target_found,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::TargetRef;
    use chrono::Utc;

    fn meta(finalizers: &[&str], deleting: bool) -> ObjectMeta {
        let mut meta = ObjectMeta::new("team-a", "p1");
        meta.finalizers = finalizers.iter().map(|f| f.to_string()).collect();
        if deleting {
            meta.deletion_timestamp = Some(Utc::now());
        }
        meta
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            classify(&meta(&[], false), DEFAULT_FINALIZER),
            FinalizerState::MissingMarker
        );
        assert_eq!(
            classify(&meta(&[DEFAULT_FINALIZER], false), DEFAULT_FINALIZER),
            FinalizerState::Active
        );
        assert_eq!(
            classify(&meta(&[DEFAULT_FINALIZER], true), DEFAULT_FINALIZER),
            FinalizerState::Deleting
        );
        assert_eq!(
            classify(&meta(&["other.io/keep"], true), DEFAULT_FINALIZER),
            FinalizerState::Released
        );
    }

    #[test]
    fn test_prefix_match_counts_as_present() {
        let m = meta(&["routemerger.io/finalizer-v2"], true);
        assert!(has_marker(&m, DEFAULT_FINALIZER));
        assert_eq!(classify(&m, DEFAULT_FINALIZER), FinalizerState::Deleting);
    }

    #[test]
    fn test_add_marker_once() {
        let mut m = meta(&[], false);
        assert!(add_marker(&mut m, DEFAULT_FINALIZER));
        assert!(!add_marker(&mut m, DEFAULT_FINALIZER));
        assert_eq!(m.finalizers, vec![DEFAULT_FINALIZER.to_string()]);
    }

    #[test]
    fn test_remove_marker_keeps_foreign_markers() {
        let mut m = meta(
            &[
                "other.io/keep",
                DEFAULT_FINALIZER,
                "routemerger.io/finalizer-v2",
            ],
            true,
        );
        assert_eq!(remove_marker(&mut m, DEFAULT_FINALIZER), 2);
        assert_eq!(m.finalizers, vec!["other.io/keep".to_string()]);
        assert_eq!(remove_marker(&mut m, DEFAULT_FINALIZER), 0);
    }

    #[test]
    fn test_released_is_terminal() {
        let patch = RoutePatch::patch("team-a", "p1", TargetRef::new("svc-a"));
        let mut deleted = patch.clone();
        deleted.metadata.deletion_timestamp = Some(Utc::now());
        assert_eq!(
            classify(&deleted.metadata, DEFAULT_FINALIZER),
            FinalizerState::Released
        );
    }
}
