//! Resource store abstraction.
//!
//! The reconciler only ever reads patches and targets, writes a patch's
//! metadata or status, and writes a target back. Every write carries the
//! `resourceVersion` the caller read; a store rejects the write with
//! [`StoreError::Conflict`] when the stored object has moved on.

pub mod error;
pub mod file;
pub mod memory;

use async_trait::async_trait;
use chrono::Utc;

use crate::resource::{ObjectKey, ResourceKind, RoutePatch, RouteTarget};

pub use error::{Result, StoreError};
pub use file::FileStore;
pub use memory::MemoryStore;

/// Capability surface the reconciler consumes.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_patch(&self, key: &ObjectKey) -> Result<RoutePatch>;

    async fn get_target(&self, key: &ObjectKey) -> Result<RouteTarget>;

    /// Writes metadata and spec. Status is left as stored. Writing back a
    /// patch whose deletion was requested with no finalizers left erases it.
    async fn update_patch(&self, patch: &RoutePatch) -> Result<RoutePatch>;

    /// Writes status only.
    async fn update_patch_status(&self, patch: &RoutePatch) -> Result<RoutePatch>;

    async fn update_target(&self, target: &RouteTarget) -> Result<RouteTarget>;

    async fn list_patches(&self) -> Result<Vec<RoutePatch>>;
}

/// Returns the resourceVersion that follows `current`.
pub(crate) fn next_version(current: &str) -> String {
    let version = current.parse::<u64>().unwrap_or(0);
    (version + 1).to_string()
}

pub(crate) fn check_version(
    kind: ResourceKind,
    key: &ObjectKey,
    stored: &str,
    incoming: &str,
) -> Result<()> {
    if stored != incoming {
        return Err(StoreError::Conflict {
            kind,
            key: key.clone(),
            expected: incoming.to_string(),
            actual: stored.to_string(),
        });
    }
    Ok(())
}

/// Builds the object a metadata/spec write produces.
pub(crate) fn prepare_patch_write(stored: &RoutePatch, incoming: &RoutePatch) -> Result<RoutePatch> {
    check_version(
        ResourceKind::RoutePatch,
        &stored.key(),
        &stored.metadata.resource_version,
        &incoming.metadata.resource_version,
    )?;

    let mut written = incoming.clone();
    written.status = stored.status.clone();
    written.metadata.uid = stored.metadata.uid.clone();
    written.metadata.deletion_timestamp = stored.metadata.deletion_timestamp;
    written.metadata.resource_version = next_version(&stored.metadata.resource_version);
    written.metadata.generation = if written.spec != stored.spec {
        stored.metadata.generation + 1
    } else {
        stored.metadata.generation
    };
    Ok(written)
}

/// Builds the object a status write produces.
pub(crate) fn prepare_status_write(
    stored: &RoutePatch,
    incoming: &RoutePatch,
) -> Result<RoutePatch> {
    check_version(
        ResourceKind::RoutePatch,
        &stored.key(),
        &stored.metadata.resource_version,
        &incoming.metadata.resource_version,
    )?;

    let mut written = stored.clone();
    written.status = incoming.status.clone();
    written.metadata.resource_version = next_version(&stored.metadata.resource_version);
    Ok(written)
}

pub(crate) fn prepare_target_write(
    stored: &RouteTarget,
    incoming: &RouteTarget,
) -> Result<RouteTarget> {
    check_version(
        ResourceKind::RouteTarget,
        &stored.key(),
        &stored.metadata.resource_version,
        &incoming.metadata.resource_version,
    )?;

    let mut written = incoming.clone();
    written.metadata.uid = stored.metadata.uid.clone();
    written.metadata.resource_version = next_version(&stored.metadata.resource_version);
    written.metadata.generation = if written.spec != stored.spec {
        stored.metadata.generation + 1
    } else {
        stored.metadata.generation
    };
    Ok(written)
}

/// Whether a patch can be erased: deletion requested and nothing blocks it.
pub(crate) fn is_erasable(patch: &RoutePatch) -> bool {
    patch.metadata.is_being_deleted() && patch.metadata.finalizers.is_empty()
}

/// Stamps a freshly created object's metadata.
pub(crate) fn initialize_meta(meta: &mut crate::resource::ObjectMeta) {
    if meta.namespace.is_empty() {
        meta.namespace = crate::resource::DEFAULT_NAMESPACE.to_string();
    }
    if meta.uid.is_none() {
        meta.uid = Some(uuid::Uuid::new_v4().to_string());
    }
    meta.resource_version = "1".to_string();
    meta.generation = 1;
    meta.deletion_timestamp = None;
}

/// Marks a patch for deletion. Returns `None` when it can be erased at once.
pub(crate) fn mark_for_deletion(stored: &RoutePatch) -> Option<RoutePatch> {
    if stored.metadata.finalizers.is_empty() {
        return None;
    }
    let mut marked = stored.clone();
    if marked.metadata.deletion_timestamp.is_none() {
        marked.metadata.deletion_timestamp = Some(Utc::now());
        marked.metadata.resource_version = next_version(&stored.metadata.resource_version);
    }
    Some(marked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{HttpRoute, RoutePatchStatus, TargetRef};

    fn stored_patch() -> RoutePatch {
        let mut patch = RoutePatch::patch("team-a", "p1", TargetRef::new("svc-a"));
        initialize_meta(&mut patch.metadata);
        patch
    }

    #[test]
    fn test_next_version() {
        assert_eq!(next_version("1"), "2");
        assert_eq!(next_version(""), "1");
        assert_eq!(next_version("41"), "42");
    }

    #[test]
    fn test_initialize_meta() {
        let mut patch = RoutePatch::patch("", "p1", TargetRef::new("svc-a"));
        initialize_meta(&mut patch.metadata);
        assert_eq!(patch.namespace(), "default");
        assert_eq!(patch.metadata.resource_version, "1");
        assert_eq!(patch.metadata.generation, 1);
        assert!(patch.metadata.uid.is_some());
    }

    #[test]
    fn test_metadata_write_keeps_generation() {
        let stored = stored_patch();
        let mut incoming = stored.clone();
        incoming.metadata.finalizers.push("routemerger.io/finalizer".to_string());

        let written = prepare_patch_write(&stored, &incoming).unwrap();
        assert_eq!(written.metadata.resource_version, "2");
        assert_eq!(written.metadata.generation, 1);
        assert_eq!(written.metadata.finalizers.len(), 1);
    }

    #[test]
    fn test_spec_write_bumps_generation() {
        let stored = stored_patch();
        let mut incoming = stored.clone();
        incoming
            .spec
            .http
            .push(HttpRoute::prefix("api", "/api", "api.svc"));
        incoming.status = Some(RoutePatchStatus {
            handled_revision: Some(9),
        });

        let written = prepare_patch_write(&stored, &incoming).unwrap();
        assert_eq!(written.metadata.generation, 2);
        // status is only written through the status path
        assert_eq!(written.handled_revision(), None);
    }

    #[test]
    fn test_stale_write_conflicts() {
        let stored = stored_patch();
        let mut incoming = stored.clone();
        incoming.metadata.resource_version = "0".to_string();

        let err = prepare_patch_write(&stored, &incoming).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert!(prepare_status_write(&stored, &incoming).is_err());
    }

    #[test]
    fn test_status_write_ignores_spec_changes() {
        let stored = stored_patch();
        let mut incoming = stored.clone();
        incoming.spec.target = TargetRef::new("svc-b");
        incoming.status = Some(RoutePatchStatus {
            handled_revision: Some(1),
        });

        let written = prepare_status_write(&stored, &incoming).unwrap();
        assert_eq!(written.spec.target.name, "svc-a");
        assert_eq!(written.handled_revision(), Some(1));
        assert_eq!(written.metadata.generation, 1);
    }

    #[test]
    fn test_mark_for_deletion() {
        let stored = stored_patch();
        assert!(mark_for_deletion(&stored).is_none());

        let mut guarded = stored.clone();
        guarded.metadata.finalizers.push("routemerger.io/finalizer".to_string());
        let marked = mark_for_deletion(&guarded).unwrap();
        assert!(marked.metadata.is_being_deleted());
        assert!(!is_erasable(&marked));

        let mut released = marked.clone();
        released.metadata.finalizers.clear();
        assert!(is_erasable(&released));
    }
}
