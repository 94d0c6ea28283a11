//! Target migration: moving a patch's routes off a target it no longer names.

use crate::context::ReconcileContext;
use crate::error::{ErrorKind, Result};
use crate::merge::MergeOutcome;
use crate::resource::{ObjectKey, RoutePatch};
use crate::sync::{sync_target, TargetOp};

/// What migration did for one reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum Migration {
    /// The resolved target is the same as before.
    Unchanged,
    /// Routes were withdrawn from the old target.
    Migrated {
        from: ObjectKey,
        to: ObjectKey,
        outcome: MergeOutcome,
    },
    /// The target changed, but the old one was gone or never valid.
    NothingToWithdraw { from: ObjectKey, to: ObjectKey },
}

/// Returns `(old, new)` target keys when the resolved target changed.
///
/// Empty namespaces resolve to the patch's own namespace on both sides.
pub fn target_changed(previous: &RoutePatch, current: &RoutePatch) -> Option<(ObjectKey, ObjectKey)> {
    let from = previous.target_key();
    let to = current.target_key();
    (from != to).then_some((from, to))
}

/// Withdraws the patch's routes from the target `previous` pointed at, if
/// `current` points somewhere else.
pub async fn migrate_if_target_changed(
    ctx: &ReconcileContext,
    previous: &RoutePatch,
    current: &RoutePatch,
) -> Result<Migration> {
    let Some((from, to)) = target_changed(previous, current) else {
        return Ok(Migration::Unchanged);
    };

    tracing::info!(from = %from, to = %to, "Target changed, removing patch from old target");

    match sync_target(ctx, previous, TargetOp::Withdraw).await {
        Ok((_, outcome)) => Ok(Migration::Migrated { from, to, outcome }),
        Err(e) if e.is_not_found() => {
            tracing::info!(target = %from, "Old target not found, nothing to withdraw");
            Ok(Migration::NothingToWithdraw { from, to })
        }
        Err(e) if e.kind() == ErrorKind::Validation => {
            // apply validates the whole patch first, so no target holds
            // routes written through a reference that fails validation
            tracing::warn!(error = %e, "Old target reference is invalid, nothing to withdraw");
            Ok(Migration::NothingToWithdraw { from, to })
        }
        Err(e) => Err(e),
    }
}
