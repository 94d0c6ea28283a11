//! Optional defaulting applied to a patch before it is synced.

use crate::resource::RoutePatch;

/// Fills in defaults on a patch. Returns true when it changed anything.
pub type DefaultingHook = fn(&mut RoutePatch) -> bool;

/// Per-kind handling options, fixed when the reconciler is built.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatchHandling {
    pub defaulting: Option<DefaultingHook>,
}

impl PatchHandling {
    pub fn with_defaulting(hook: DefaultingHook) -> Self {
        Self {
            defaulting: Some(hook),
        }
    }

    /// Runs the configured hook, if any.
    pub fn apply_defaults(&self, patch: &mut RoutePatch) -> bool {
        match self.defaulting {
            Some(hook) => hook(patch),
            None => false,
        }
    }
}

/// Writes the patch's own namespace into an empty target namespace.
pub fn pin_target_namespace(patch: &mut RoutePatch) -> bool {
    if !patch.spec.target.namespace.is_empty() {
        return false;
    }
    patch.spec.target.namespace = patch.metadata.namespace.clone();
    true
}
