//! In-memory resource store.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use super::error::{Result, StoreError};
use super::{
    initialize_meta, is_erasable, mark_for_deletion, prepare_patch_write, prepare_status_write,
    prepare_target_write, ResourceStore,
};
use crate::resource::{ObjectKey, ResourceKind, RoutePatch, RouteTarget};

/// Store backed by two maps. Writes follow the same versioning rules as the
/// file store, so it stands in for a real cluster in tests and embedders.
#[derive(Default)]
pub struct MemoryStore {
    patches: RwLock<BTreeMap<ObjectKey, RoutePatch>>,
    targets: RwLock<BTreeMap<ObjectKey, RouteTarget>>,
    /// Errors returned by the next writes, oldest first.
    injected: Mutex<VecDeque<StoreError>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a patch. Metadata is stamped as a fresh object.
    pub async fn create_patch(&self, mut patch: RoutePatch) -> Result<RoutePatch> {
        initialize_meta(&mut patch.metadata);
        let mut patches = self.patches.write().await;
        let key = patch.key();
        if patches.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: ResourceKind::RoutePatch,
                key,
            });
        }
        patches.insert(key, patch.clone());
        Ok(patch)
    }

    /// Creates a target. Metadata is stamped as a fresh object.
    pub async fn create_target(&self, mut target: RouteTarget) -> Result<RouteTarget> {
        initialize_meta(&mut target.metadata);
        let mut targets = self.targets.write().await;
        let key = target.key();
        if targets.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: ResourceKind::RouteTarget,
                key,
            });
        }
        targets.insert(key, target.clone());
        Ok(target)
    }

    /// Replaces a patch's spec the way a user edit would.
    pub async fn edit_patch<F>(&self, key: &ObjectKey, edit: F) -> Result<RoutePatch>
    where
        F: FnOnce(&mut RoutePatch),
    {
        let mut patches = self.patches.write().await;
        let stored = patches.get(key).ok_or_else(|| StoreError::NotFound {
            kind: ResourceKind::RoutePatch,
            key: key.clone(),
        })?;
        let mut incoming = stored.clone();
        edit(&mut incoming);
        let written = prepare_patch_write(stored, &incoming)?;
        patches.insert(key.clone(), written.clone());
        Ok(written)
    }

    /// Requests deletion of a patch. Returns true when it was erased at once.
    pub async fn request_deletion(&self, key: &ObjectKey) -> Result<bool> {
        let mut patches = self.patches.write().await;
        let stored = patches.get(key).ok_or_else(|| StoreError::NotFound {
            kind: ResourceKind::RoutePatch,
            key: key.clone(),
        })?;
        match mark_for_deletion(stored) {
            Some(marked) => {
                patches.insert(key.clone(), marked);
                Ok(false)
            }
            None => {
                patches.remove(key);
                Ok(true)
            }
        }
    }

    pub async fn delete_target(&self, key: &ObjectKey) -> bool {
        self.targets.write().await.remove(key).is_some()
    }

    /// Makes the next write fail with `error`.
    pub async fn fail_next_write(&self, error: StoreError) {
        self.injected.lock().await.push_back(error);
    }

    pub async fn patch_exists(&self, key: &ObjectKey) -> bool {
        self.patches.read().await.contains_key(key)
    }

    async fn take_injected(&self) -> Result<()> {
        match self.injected.lock().await.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_patch(&self, key: &ObjectKey) -> Result<RoutePatch> {
        self.patches
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: ResourceKind::RoutePatch,
                key: key.clone(),
            })
    }

    async fn get_target(&self, key: &ObjectKey) -> Result<RouteTarget> {
        self.targets
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: ResourceKind::RouteTarget,
                key: key.clone(),
            })
    }

    async fn update_patch(&self, patch: &RoutePatch) -> Result<RoutePatch> {
        self.take_injected().await?;
        let key = patch.key();
        let mut patches = self.patches.write().await;
        let stored = patches.get(&key).ok_or_else(|| StoreError::NotFound {
            kind: ResourceKind::RoutePatch,
            key: key.clone(),
        })?;

        let written = prepare_patch_write(stored, patch)?;
        if is_erasable(&written) {
            log::debug!("Erasing RoutePatch {}: no finalizers left", key);
            patches.remove(&key);
        } else {
            patches.insert(key, written.clone());
        }
        Ok(written)
    }

    async fn update_patch_status(&self, patch: &RoutePatch) -> Result<RoutePatch> {
        self.take_injected().await?;
        let key = patch.key();
        let mut patches = self.patches.write().await;
        let stored = patches.get(&key).ok_or_else(|| StoreError::NotFound {
            kind: ResourceKind::RoutePatch,
            key: key.clone(),
        })?;

        let written = prepare_status_write(stored, patch)?;
        patches.insert(key, written.clone());
        Ok(written)
    }

    async fn update_target(&self, target: &RouteTarget) -> Result<RouteTarget> {
        self.take_injected().await?;
        let key = target.key();
        let mut targets = self.targets.write().await;
        let stored = targets.get(&key).ok_or_else(|| StoreError::NotFound {
            kind: ResourceKind::RouteTarget,
            key: key.clone(),
        })?;

        let written = prepare_target_write(stored, target)?;
        targets.insert(key, written.clone());
        Ok(written)
    }

    async fn list_patches(&self) -> Result<Vec<RoutePatch>> {
        Ok(self.patches.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{HttpRoute, TargetRef};

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("team-a", name)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryStore::new();
        store
            .create_patch(RoutePatch::patch("team-a", "p1", TargetRef::new("svc-a")))
            .await
            .unwrap();
        store
            .create_target(RouteTarget::target("team-a", "svc-a"))
            .await
            .unwrap();

        let patch = store.get_patch(&key("p1")).await.unwrap();
        assert_eq!(patch.metadata.resource_version, "1");
        assert!(store.get_target(&key("svc-a")).await.is_ok());

        let missing = store.get_target(&key("svc-b")).await.unwrap_err();
        assert!(missing.is_not_found());

        let duplicate = store
            .create_patch(RoutePatch::patch("team-a", "p1", TargetRef::new("svc-a")))
            .await
            .unwrap_err();
        assert!(matches!(duplicate, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_target_write_conflicts_on_stale_version() {
        let store = MemoryStore::new();
        let target = store
            .create_target(RouteTarget::target("team-a", "svc-a"))
            .await
            .unwrap();

        let mut first = target.clone();
        first
            .spec
            .http
            .push(HttpRoute::prefix("a", "/a", "a.svc"));
        let written = store.update_target(&first).await.unwrap();
        assert_eq!(written.metadata.resource_version, "2");

        let err = store.update_target(&target).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_deletion_waits_for_finalizers() {
        let store = MemoryStore::new();
        let mut patch = RoutePatch::patch("team-a", "p1", TargetRef::new("svc-a"));
        patch.metadata.finalizers.push("routemerger.io/finalizer".to_string());
        store.create_patch(patch).await.unwrap();

        assert!(!store.request_deletion(&key("p1")).await.unwrap());
        let mut marked = store.get_patch(&key("p1")).await.unwrap();
        assert!(marked.metadata.is_being_deleted());

        marked.metadata.finalizers.clear();
        store.update_patch(&marked).await.unwrap();
        assert!(!store.patch_exists(&key("p1")).await);
    }

    #[tokio::test]
    async fn test_patch_without_finalizer_is_erased_at_once() {
        let store = MemoryStore::new();
        store
            .create_patch(RoutePatch::patch("team-a", "p1", TargetRef::new("svc-a")))
            .await
            .unwrap();
        assert!(store.request_deletion(&key("p1")).await.unwrap());
        assert!(store.get_patch(&key("p1")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_injected_failure_applies_once() {
        let store = MemoryStore::new();
        let target = store
            .create_target(RouteTarget::target("team-a", "svc-a"))
            .await
            .unwrap();
        store
            .fail_next_write(StoreError::Unavailable("connection reset".to_string()))
            .await;

        assert!(store.update_target(&target).await.is_err());
        assert!(store.update_target(&target).await.is_ok());
    }

    #[tokio::test]
    async fn test_edit_patch_bumps_generation() {
        let store = MemoryStore::new();
        store
            .create_patch(RoutePatch::patch("team-a", "p1", TargetRef::new("svc-a")))
            .await
            .unwrap();

        let edited = store
            .edit_patch(&key("p1"), |p| p.spec.target = TargetRef::new("svc-b"))
            .await
            .unwrap();
        assert_eq!(edited.metadata.generation, 2);
        assert_eq!(edited.target_key(), key("svc-b"));
    }
}
