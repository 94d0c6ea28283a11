//! Everything a reconciliation needs, built once at startup.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::defaulting::{pin_target_namespace, DefaultingHook, PatchHandling};
use crate::finalizer::DEFAULT_FINALIZER;
use crate::merge::MergePolicy;
use crate::store::ResourceStore;

/// Shared reconciliation context, passed by reference into every call.
#[derive(Clone)]
pub struct ReconcileContext {
    store: Arc<dyn ResourceStore>,
    finalizer: String,
    policy: MergePolicy,
    handling: PatchHandling,
}

impl ReconcileContext {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            finalizer: DEFAULT_FINALIZER.to_string(),
            policy: MergePolicy::default(),
            handling: PatchHandling::default(),
        }
    }

    /// Builds a context from loaded configuration.
    pub fn from_config(store: Arc<dyn ResourceStore>, config: &EngineConfig) -> Self {
        let mut ctx = Self::new(store)
            .with_finalizer(config.finalizer.clone())
            .with_policy(MergePolicy::new(config.insert_position));
        if config.pin_target_namespace {
            ctx = ctx.with_defaulting(pin_target_namespace);
        }
        ctx
    }

    pub fn with_finalizer(mut self, finalizer: impl Into<String>) -> Self {
        self.finalizer = finalizer.into();
        self
    }

    pub fn with_policy(mut self, policy: MergePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_defaulting(mut self, hook: DefaultingHook) -> Self {
        self.handling = PatchHandling::with_defaulting(hook);
        self
    }

    pub fn store(&self) -> &dyn ResourceStore {
        self.store.as_ref()
    }

    pub fn finalizer(&self) -> &str {
        &self.finalizer
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    pub fn handling(&self) -> &PatchHandling {
        &self.handling
    }
}

impl std::fmt::Debug for ReconcileContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileContext")
            .field("finalizer", &self.finalizer)
            .field("policy", &self.policy)
            .field("handling", &self.handling)
            .finish_non_exhaustive()
    }
}
