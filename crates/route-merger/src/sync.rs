//! Read-modify-write of one target on behalf of one patch.

use tracing::Instrument;

use crate::context::ReconcileContext;
use crate::error::Result;
use crate::merge::{self, MergeOutcome};
use crate::resource::{ObjectKey, RoutePatch};
use crate::validation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TargetOp {
    /// Merge the patch's routes into its target.
    Apply,
    /// Remove every entry the patch contributed to its target.
    Withdraw,
}

impl std::fmt::Display for TargetOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetOp::Apply => write!(f, "apply"),
            TargetOp::Withdraw => write!(f, "withdraw"),
        }
    }
}

/// Fetches the target `patch` points at, merges, and writes it back.
///
/// The target is written only when the merge changed it. A missing target
/// surfaces as a not-found error; callers decide whether that matters.
pub(crate) async fn sync_target(
    ctx: &ReconcileContext,
    patch: &RoutePatch,
    op: TargetOp,
) -> Result<(ObjectKey, MergeOutcome)> {
    match op {
        TargetOp::Apply => validation::validate_patch(patch)?,
        TargetOp::Withdraw => validation::validate_target_ref(patch)?,
    }

    let target_key = patch.target_key();
    let span = tracing::debug_span!("target", op = %op, target = %target_key);
    let outcome = write_target(ctx, patch, op, &target_key)
        .instrument(span)
        .await?;

    Ok((target_key, outcome))
}

async fn write_target(
    ctx: &ReconcileContext,
    patch: &RoutePatch,
    op: TargetOp,
    target_key: &ObjectKey,
) -> Result<MergeOutcome> {
    let target = ctx.store().get_target(target_key).await?;

    let (spec, outcome) = match op {
        TargetOp::Apply => merge::apply(patch, &target.spec, ctx.policy()),
        TargetOp::Withdraw => merge::withdraw(&patch.key(), &target.spec),
    };

    if outcome.is_noop() {
        tracing::debug!("Target already up to date, skipping write");
        return Ok(outcome);
    }

    let mut updated = target;
    updated.spec = spec;
    ctx.store().update_target(&updated).await?;
    tracing::debug!(%outcome, "Target written");

    Ok(outcome)
}
