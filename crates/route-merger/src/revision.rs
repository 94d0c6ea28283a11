//! Revision tracking: decides whether a patch's routes must be re-applied.

use crate::resource::{RoutePatch, RoutePatchStatus};

/// True when the spec changed since the last completed reconciliation.
pub fn needs_sync(patch: &RoutePatch) -> bool {
    patch.handled_revision() != Some(patch.revision())
}

/// Records the current revision as handled.
pub fn mark_handled(patch: &mut RoutePatch) {
    let revision = patch.revision();
    patch
        .status
        .get_or_insert_with(RoutePatchStatus::default)
        .handled_revision = Some(revision);
}
