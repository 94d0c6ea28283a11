//! Resource store backed by a directory of YAML files.
//!
//! Layout: `{root}/{namespace}/patches/{name}.yaml` and
//! `{root}/{namespace}/targets/{name}.yaml`.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use walkdir::WalkDir;

use super::error::{Result, StoreError};
use super::{
    initialize_meta, is_erasable, mark_for_deletion, prepare_patch_write, prepare_status_write,
    prepare_target_write, ResourceStore,
};
use crate::resource::{
    ObjectKey, ResourceHeader, ResourceKind, RoutePatch, RouteTarget, API_VERSION,
};

/// Every resource file ends with this; other files are ignored.
const RESOURCE_EXTENSION: &str = ".yaml";

pub struct FileStore {
    /// Root directory of the store.
    root: PathBuf,
    /// Serializes read-check-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::WriteFile {
            path: root.clone(),
            source: e,
        })?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the store root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Gets the file path for an object.
    pub fn path_for(&self, kind: ResourceKind, key: &ObjectKey) -> PathBuf {
        self.root
            .join(&key.namespace)
            .join(kind.directory())
            .join(format!("{}{}", key.name, RESOURCE_EXTENSION))
    }

    /// Creates a patch file. Metadata is stamped as a fresh object.
    pub async fn create_patch(&self, mut patch: RoutePatch) -> Result<RoutePatch> {
        initialize_meta(&mut patch.metadata);
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(ResourceKind::RoutePatch, &patch.key());
        if path.exists() {
            return Err(StoreError::AlreadyExists {
                kind: ResourceKind::RoutePatch,
                key: patch.key(),
            });
        }
        self.write_file(&path, &patch)?;
        Ok(patch)
    }

    /// Creates a target file. Metadata is stamped as a fresh object.
    pub async fn create_target(&self, mut target: RouteTarget) -> Result<RouteTarget> {
        initialize_meta(&mut target.metadata);
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(ResourceKind::RouteTarget, &target.key());
        if path.exists() {
            return Err(StoreError::AlreadyExists {
                kind: ResourceKind::RouteTarget,
                key: target.key(),
            });
        }
        self.write_file(&path, &target)?;
        Ok(target)
    }

    /// Requests deletion of a patch. Returns true when it was erased at once.
    pub async fn request_deletion(&self, key: &ObjectKey) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let stored: RoutePatch = self.read(ResourceKind::RoutePatch, key)?;
        match mark_for_deletion(&stored) {
            Some(marked) => {
                self.write_file(&self.path_for(ResourceKind::RoutePatch, key), &marked)?;
                Ok(false)
            }
            None => {
                self.remove_file(ResourceKind::RoutePatch, key)?;
                Ok(true)
            }
        }
    }

    fn read<T>(&self, kind: ResourceKind, key: &ObjectKey) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let path = self.path_for(kind, key);
        if !path.exists() {
            return Err(StoreError::NotFound {
                kind,
                key: key.clone(),
            });
        }
        self.load_file(&path, kind)
    }

    /// Loads and parses a single resource file, checking its header.
    pub fn load_file<T>(&self, path: &Path, expected: ResourceKind) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let content = fs::read_to_string(path).map_err(|e| StoreError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        // First, parse the header to check the kind
        let header: ResourceHeader =
            serde_yaml::from_str(&content).map_err(|e| StoreError::ParseYaml {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        if header.api_version != API_VERSION {
            return Err(StoreError::InvalidResource {
                path: path.to_path_buf(),
                message: format!(
                    "apiVersion '{}', expected '{}'",
                    header.api_version, API_VERSION
                ),
            });
        }
        if header.kind != expected {
            return Err(StoreError::InvalidResource {
                path: path.to_path_buf(),
                message: format!("kind '{}', expected '{}'", header.kind, expected),
            });
        }
        // an object is only ever addressed through the file its key maps to
        if let Some(location) = key_for_path(path) {
            let declared = header.metadata.key();
            if declared != location {
                return Err(StoreError::InvalidResource {
                    path: path.to_path_buf(),
                    message: format!(
                        "metadata names '{}', file location is '{}'",
                        declared, location
                    ),
                });
            }
        }

        serde_yaml::from_str(&content).map_err(|e| StoreError::ParseYaml {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    fn write_file<T: Serialize>(&self, path: &Path, resource: &T) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::WriteFile {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        let content = serde_yaml::to_string(resource)?;

        // Write to a sibling file first so readers never see a partial document
        let staging = path.with_extension("yaml.tmp");
        fs::write(&staging, content).map_err(|e| StoreError::WriteFile {
            path: staging.clone(),
            source: e,
        })?;
        fs::rename(&staging, path).map_err(|e| StoreError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(())
    }

    fn remove_file(&self, kind: ResourceKind, key: &ObjectKey) -> Result<()> {
        let path = self.path_for(kind, key);
        fs::remove_file(&path).map_err(|e| StoreError::WriteFile { path, source: e })
    }
}

#[async_trait]
impl ResourceStore for FileStore {
    async fn get_patch(&self, key: &ObjectKey) -> Result<RoutePatch> {
        self.read(ResourceKind::RoutePatch, key)
    }

    async fn get_target(&self, key: &ObjectKey) -> Result<RouteTarget> {
        self.read(ResourceKind::RouteTarget, key)
    }

    async fn update_patch(&self, patch: &RoutePatch) -> Result<RoutePatch> {
        let _guard = self.write_lock.lock().await;
        let key = patch.key();
        let stored: RoutePatch = self.read(ResourceKind::RoutePatch, &key)?;

        let written = prepare_patch_write(&stored, patch)?;
        if is_erasable(&written) {
            log::debug!("Erasing RoutePatch {}: no finalizers left", key);
            self.remove_file(ResourceKind::RoutePatch, &key)?;
        } else {
            self.write_file(&self.path_for(ResourceKind::RoutePatch, &key), &written)?;
        }
        Ok(written)
    }

    async fn update_patch_status(&self, patch: &RoutePatch) -> Result<RoutePatch> {
        let _guard = self.write_lock.lock().await;
        let key = patch.key();
        let stored: RoutePatch = self.read(ResourceKind::RoutePatch, &key)?;

        let written = prepare_status_write(&stored, patch)?;
        self.write_file(&self.path_for(ResourceKind::RoutePatch, &key), &written)?;
        Ok(written)
    }

    async fn update_target(&self, target: &RouteTarget) -> Result<RouteTarget> {
        let _guard = self.write_lock.lock().await;
        let key = target.key();
        let stored: RouteTarget = self.read(ResourceKind::RouteTarget, &key)?;

        let written = prepare_target_write(&stored, target)?;
        self.write_file(&self.path_for(ResourceKind::RouteTarget, &key), &written)?;
        Ok(written)
    }

    async fn list_patches(&self) -> Result<Vec<RoutePatch>> {
        let mut patches = Vec::new();

        for entry in WalkDir::new(&self.root)
            .min_depth(3)
            .max_depth(3)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() || !is_patch_file(&self.root, path) {
                continue;
            }

            match self.load_file::<RoutePatch>(path, ResourceKind::RoutePatch) {
                Ok(patch) => patches.push(patch),
                Err(e) => {
                    // One broken file must not hide every other patch
                    log::warn!("Skipping {}: {}", path.display(), e);
                }
            }
        }

        patches.sort_by_key(|p| p.key());
        Ok(patches)
    }
}

/// Maps a path inside the store to the key of the patch it holds.
pub fn patch_key_for_path(root: &Path, path: &Path) -> Option<ObjectKey> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;

    match parts.as_slice() {
        [namespace, dir, file] if *dir == ResourceKind::RoutePatch.directory() => {
            let name = file.strip_suffix(RESOURCE_EXTENSION)?;
            if namespace.starts_with('.') || name.is_empty() || name.starts_with('.') {
                return None;
            }
            Some(ObjectKey::new(*namespace, name))
        }
        _ => None,
    }
}

/// Key implied by `{namespace}/{kind-dir}/{name}.yaml` at the end of `path`.
fn key_for_path(path: &Path) -> Option<ObjectKey> {
    let name = path.file_name()?.to_str()?.strip_suffix(RESOURCE_EXTENSION)?;
    let namespace = path.parent()?.parent()?.file_name()?.to_str()?;
    Some(ObjectKey::new(namespace, name))
}

fn is_patch_file(root: &Path, path: &Path) -> bool {
    patch_key_for_path(root, path).is_some()
}
