//! Local filesystem asset store.
//!
//! Layout below the root:
//! - `assets/k1/k2/k3/k4.data` canonical blob, `assets/k1/k2/k3/k4/<filename>` aliases
//! - `manifests/...` and `changelogs/...` published documents
//! - `staging/` private in-flight uploads
//!
//! Staging lives under the same root so promotion is a hard link, never a
//! copy.

use crate::error::{StorageError, StorageResult};
use crate::staging::{StagedFile, StagingFile, remove_if_exists};
use crate::traits::{AssetStore, PromoteOutcome};
use appdistrib_core::AssetKey;
use appdistrib_core::layout::{self, ASSETS_DIR, CHANGELOGS_DIR, MANIFESTS_DIR, STAGING_DIR};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Permission bits of published blobs.
const PUBLISHED_MODE: u32 = 0o644;

/// Local filesystem asset store.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the full path for a document, with path traversal protection.
    ///
    /// Documents may only live below the manifest and changelog roots.
    async fn document_path(&self, key: &str) -> StorageResult<PathBuf> {
        let top = key.split('/').next().unwrap_or_default();
        if top != MANIFESTS_DIR && top != CHANGELOGS_DIR {
            return Err(StorageError::InvalidKey(format!(
                "documents must live under {MANIFESTS_DIR}/ or {CHANGELOGS_DIR}/: {key}"
            )));
        }

        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::key_path_sync(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Synchronous key path validation.
    ///
    /// Returns an error if the key would escape the storage root, including
    /// through a symlinked file or ancestor directory.
    fn key_path_sync(root: &Path, key: &str) -> StorageResult<PathBuf> {
        if key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidKey(format!(
                "path traversal not allowed: {key}"
            )));
        }

        for component in Path::new(key).components() {
            if !matches!(component, std::path::Component::Normal(_)) {
                return Err(StorageError::InvalidKey(format!(
                    "contains unsafe path component: {key}"
                )));
            }
        }

        let path = root.join(key);
        let root_canonical = root.canonicalize().map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to canonicalize root: {e}"),
            ))
        })?;

        // Check the path itself if it exists, otherwise its nearest existing
        // ancestor, so directories are never created through a symlink.
        let mut candidate = path.as_path();
        loop {
            match std::fs::symlink_metadata(candidate) {
                Ok(meta) => {
                    let canonical = candidate.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            StorageError::InvalidKey(format!(
                                "symlink target missing or invalid: {key}"
                            ))
                        } else {
                            StorageError::Io(e)
                        }
                    })?;
                    if !canonical.starts_with(&root_canonical) {
                        return Err(StorageError::InvalidKey(format!(
                            "resolved path escapes storage root: {key}"
                        )));
                    }
                    return Ok(path);
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(StorageError::Io(err)),
            }
            match candidate.parent() {
                Some(parent) => candidate = parent,
                None => return Ok(path),
            }
        }
    }

    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn is_empty_dir(dir: &Path) -> StorageResult<bool> {
        match fs::read_dir(dir).await {
            Ok(mut entries) => Ok(entries.next_entry().await?.is_none()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

#[cfg(unix)]
async fn set_published_mode(path: &Path) -> StorageResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(PUBLISHED_MODE)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_published_mode(_path: &Path) -> StorageResult<()> {
    Ok(())
}

#[async_trait]
impl AssetStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn stage(&self) -> StorageResult<StagingFile> {
        StagingFile::create(&self.root.join(STAGING_DIR)).await
    }

    #[instrument(skip(self, staged), fields(backend = "filesystem", key = %key, size = staged.size()))]
    async fn promote(
        &self,
        staged: StagedFile,
        filename: &str,
        key: &AssetKey,
    ) -> StorageResult<PromoteOutcome> {
        // `staged` stays armed until the end, so every early return deletes it.
        layout::validate_filename(filename)
            .map_err(|e| StorageError::InvalidPath(e.to_string()))?;

        let leaf = self.root.join(layout::asset_leaf_dir(key));
        let blob = self.root.join(layout::asset_blob_path(key));
        let alias = leaf.join(filename);

        fs::create_dir_all(&leaf).await?;
        set_published_mode(staged.path()).await?;

        // Linking fails if the blob exists, which makes the first writer win.
        let outcome = match fs::hard_link(staged.path(), &blob).await {
            Ok(()) => PromoteOutcome::Stored,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => PromoteOutcome::Deduplicated,
            Err(e) => return Err(StorageError::Io(e)),
        };
        staged.discard().await?;

        remove_if_exists(&alias).await?;
        match fs::hard_link(&blob, &alias).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(StorageError::Io(e)),
        }
        set_published_mode(&blob).await?;

        tracing::debug!(outcome = ?outcome, filename = %filename, "Asset promoted");
        Ok(outcome)
    }

    #[instrument(skip(self), fields(backend = "filesystem", key = %key))]
    async fn remove(&self, key: &AssetKey, filename: &str) -> StorageResult<()> {
        remove_if_exists(&self.root.join(layout::asset_blob_path(key))).await?;

        let leaf = self.root.join(layout::asset_leaf_dir(key));
        if layout::validate_filename(filename).is_ok() {
            remove_if_exists(&leaf.join(filename)).await?;
        }

        // Other aliases left behind by earlier uploads under different names.
        let mut entries = match fs::read_dir(&leaf).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StorageError::Io(e)),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                remove_if_exists(&entry.path()).await?;
            }
        }
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem", key = %key))]
    async fn contains(&self, key: &AssetKey) -> StorageResult<bool> {
        let blob = self.root.join(layout::asset_blob_path(key));
        fs::try_exists(&blob).await.map_err(StorageError::Io)
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put_document(&self, path: &str, data: Bytes) -> StorageResult<()> {
        let target = self.document_path(path).await?;
        self.ensure_parent(&target).await?;

        // Write to temp file with unique name, fsync, then rename for atomicity
        let temp_name = format!(".tmp.{}", Uuid::new_v4());
        let temp_path = target.with_file_name(
            target
                .file_name()
                .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
                .unwrap_or_else(|| temp_name.clone()),
        );
        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, &target).await
        }
        .await;
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io(e));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_document(&self, path: &str) -> StorageResult<Bytes> {
        let target = self.document_path(path).await?;
        let data = fs::read(&target).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(path.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete_document(&self, path: &str) -> StorageResult<bool> {
        let target = self.document_path(path).await?;
        match fs::remove_file(&target).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn sweep_empty_dirs(&self) -> StorageResult<u64> {
        let mut removed = 0;

        for top in [ASSETS_DIR, MANIFESTS_DIR, CHANGELOGS_DIR] {
            let base = self.root.join(top);

            // Pre-order walk; reversing it visits children before parents, so
            // nested empty directories collapse in a single sweep.
            let mut dirs = Vec::new();
            let mut stack = vec![base.clone()];
            while let Some(dir) = stack.pop() {
                let mut entries = match fs::read_dir(&dir).await {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(StorageError::Io(e)),
                };
                while let Some(entry) = entries.next_entry().await? {
                    // file_type() does not follow symlinks
                    if entry.file_type().await?.is_dir() {
                        stack.push(entry.path());
                    }
                }
                dirs.push(dir);
            }

            for dir in dirs.iter().rev().filter(|d| **d != base) {
                if !Self::is_empty_dir(dir).await? {
                    continue;
                }
                match fs::remove_dir(dir).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        tracing::debug!(dir = %dir.display(), error = %e, "Directory no longer removable");
                    }
                }
            }
        }

        Ok(removed)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {}", e),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}
