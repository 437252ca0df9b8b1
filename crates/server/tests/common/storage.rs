//! Storage test utilities.

use appdistrib_core::AssetKey;
use appdistrib_storage::{
    AssetStore, PromoteOutcome, StagedFile, StagingFile, StorageError, StorageResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Wraps a store and fails promotions or document writes on demand.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct FailingStore {
    inner: Arc<dyn AssetStore>,
    pub fail_promote: AtomicBool,
    pub fail_documents: AtomicBool,
}

#[allow(dead_code)]
impl FailingStore {
    pub fn new(inner: Arc<dyn AssetStore>) -> Self {
        Self {
            inner,
            fail_promote: AtomicBool::new(false),
            fail_documents: AtomicBool::new(false),
        }
    }

    fn injected() -> StorageError {
        StorageError::Io(std::io::Error::other("injected storage fault"))
    }
}

#[async_trait]
impl AssetStore for FailingStore {
    async fn stage(&self) -> StorageResult<StagingFile> {
        self.inner.stage().await
    }

    async fn promote(
        &self,
        staged: StagedFile,
        filename: &str,
        key: &AssetKey,
    ) -> StorageResult<PromoteOutcome> {
        if self.fail_promote.load(Ordering::SeqCst) {
            staged.discard().await?;
            return Err(Self::injected());
        }
        self.inner.promote(staged, filename, key).await
    }

    async fn remove(&self, key: &AssetKey, filename: &str) -> StorageResult<()> {
        self.inner.remove(key, filename).await
    }

    async fn contains(&self, key: &AssetKey) -> StorageResult<bool> {
        self.inner.contains(key).await
    }

    async fn put_document(&self, path: &str, data: Bytes) -> StorageResult<()> {
        if self.fail_documents.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.put_document(path, data).await
    }

    async fn get_document(&self, path: &str) -> StorageResult<Bytes> {
        self.inner.get_document(path).await
    }

    async fn delete_document(&self, path: &str) -> StorageResult<bool> {
        self.inner.delete_document(path).await
    }

    async fn sweep_empty_dirs(&self) -> StorageResult<u64> {
        self.inner.sweep_empty_dirs().await
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

/// Wraps a store and parks the write of one document until released.
#[allow(dead_code)]
pub struct PausingStore {
    inner: Arc<dyn AssetStore>,
    path: String,
    /// Signalled when the paused write starts.
    pub reached: Notify,
    /// Signal to let the paused write proceed.
    pub release: Notify,
}

#[allow(dead_code)]
impl PausingStore {
    pub fn new(inner: Arc<dyn AssetStore>, path: impl Into<String>) -> Self {
        Self {
            inner,
            path: path.into(),
            reached: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl AssetStore for PausingStore {
    async fn stage(&self) -> StorageResult<StagingFile> {
        self.inner.stage().await
    }

    async fn promote(
        &self,
        staged: StagedFile,
        filename: &str,
        key: &AssetKey,
    ) -> StorageResult<PromoteOutcome> {
        self.inner.promote(staged, filename, key).await
    }

    async fn remove(&self, key: &AssetKey, filename: &str) -> StorageResult<()> {
        self.inner.remove(key, filename).await
    }

    async fn contains(&self, key: &AssetKey) -> StorageResult<bool> {
        self.inner.contains(key).await
    }

    async fn put_document(&self, path: &str, data: Bytes) -> StorageResult<()> {
        if path == self.path {
            self.reached.notify_one();
            self.release.notified().await;
        }
        self.inner.put_document(path, data).await
    }

    async fn get_document(&self, path: &str) -> StorageResult<Bytes> {
        self.inner.get_document(path).await
    }

    async fn delete_document(&self, path: &str) -> StorageResult<bool> {
        self.inner.delete_document(path).await
    }

    async fn sweep_empty_dirs(&self) -> StorageResult<u64> {
        self.inner.sweep_empty_dirs().await
    }

    fn backend_name(&self) -> &'static str {
        "pausing"
    }
}
