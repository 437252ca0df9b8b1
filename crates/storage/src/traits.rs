//! Storage trait definitions.

use crate::error::StorageResult;
use crate::staging::{StagedFile, StagingFile};
use appdistrib_core::AssetKey;
use async_trait::async_trait;
use bytes::Bytes;

/// Result of promoting a staged file into the content-addressable store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromoteOutcome {
    /// The staged file became the canonical blob for its key.
    Stored,
    /// A canonical blob already existed; the staged file was discarded.
    Deduplicated,
}

/// Asset storage: private staging, content-addressed blobs and the published
/// manifest/changelog documents that sit next to them.
#[async_trait]
pub trait AssetStore: Send + Sync + 'static {
    /// Open a private, uniquely named staging file for an in-flight upload.
    async fn stage(&self) -> StorageResult<StagingFile>;

    /// Move a verified staged file into the store under `key` and (re)create
    /// the `filename` alias. Idempotent per key: if the canonical blob already
    /// exists the staged file is discarded. The staged file is always
    /// consumed, on success and on error.
    async fn promote(
        &self,
        staged: StagedFile,
        filename: &str,
        key: &AssetKey,
    ) -> StorageResult<PromoteOutcome>;

    /// Delete the canonical blob and every alias of `key`, including
    /// `filename`. Missing files are not an error. Emptied directories are
    /// left for [`AssetStore::sweep_empty_dirs`].
    async fn remove(&self, key: &AssetKey, filename: &str) -> StorageResult<()>;

    /// Check whether a canonical blob exists for `key`.
    async fn contains(&self, key: &AssetKey) -> StorageResult<bool>;

    /// Atomically write a document (manifest or changelog) at a
    /// storage-root relative path.
    async fn put_document(&self, path: &str, data: Bytes) -> StorageResult<()>;

    /// Read a document.
    async fn get_document(&self, path: &str) -> StorageResult<Bytes>;

    /// Delete a document. Returns false if it did not exist.
    async fn delete_document(&self, path: &str) -> StorageResult<bool>;

    /// Remove empty directories below the asset, manifest and changelog
    /// roots. Returns the number of directories removed.
    async fn sweep_empty_dirs(&self) -> StorageResult<u64>;

    /// Get the backend name (for logging/metrics).
    fn backend_name(&self) -> &'static str;

    /// Check backend connectivity and health.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
