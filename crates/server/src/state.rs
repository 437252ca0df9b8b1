//! Application state shared across handlers.

use appdistrib_core::config::AppConfig;
use appdistrib_metadata::MetadataStore;
use appdistrib_storage::AssetStore;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Serializes asset reclamation against ingestion.
///
/// Finalizing an upload (promote, then register) holds the read side, so
/// uploads to different projects commit concurrently. The orphan sweep and
/// the empty directory sweep take the write side, so they never remove a
/// blob or a leaf directory that a commit is about to reference.
pub type AssetGate = Arc<RwLock<()>>;

/// One commit lock per `(organization, project)`.
///
/// Registering a build, enforcing retention and publishing its documents
/// happen under the project's lock, as does regeneration. Retention run by
/// one upload therefore never interleaves with another upload's publish.
/// Take it before the asset gate.
pub type ProjectLocks = Arc<DashMap<(String, String), Arc<Mutex<()>>>>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Asset storage backend.
    pub storage: Arc<dyn AssetStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Ingestion/GC interlock.
    pub asset_gate: AssetGate,
    /// Per-project commit serialization.
    pub project_locks: ProjectLocks,
}

impl AppState {
    /// Create a new application state.
    ///
    /// The configuration is expected to have passed [`AppConfig::validate`].
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn AssetStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            storage,
            metadata,
            asset_gate: Arc::new(RwLock::new(())),
            project_locks: Arc::new(DashMap::new()),
        }
    }

    /// Wait for the commit lock of a project.
    pub async fn lock_project(&self, organization: &str, project: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .project_locks
            .entry((organization.to_string(), project.to_string()))
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Secret keying every asset address.
    pub fn storage_secret(&self) -> &[u8] {
        self.config.storage.secret_key.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appdistrib_metadata::SqliteStore;
    use appdistrib_storage::FilesystemBackend;
    use tempfile::tempdir;

    #[tokio::test]
    async fn clones_share_the_asset_gate() {
        let temp = tempdir().unwrap();
        let storage: Arc<dyn AssetStore> =
            Arc::new(FilesystemBackend::new(temp.path()).await.unwrap());
        let metadata: Arc<dyn MetadataStore> =
            Arc::new(SqliteStore::new(temp.path().join("metadata.db"), None).await.unwrap());

        let state = AppState::new(AppConfig::for_testing(), storage, metadata);
        let clone = state.clone();

        let _shared = state.asset_gate.read().await;
        assert!(clone.asset_gate.try_write().is_err());
        assert_eq!(clone.storage_secret(), b"test-storage-secret");
    }

    #[tokio::test]
    async fn project_locks_are_per_project() {
        let temp = tempdir().unwrap();
        let storage: Arc<dyn AssetStore> =
            Arc::new(FilesystemBackend::new(temp.path()).await.unwrap());
        let metadata: Arc<dyn MetadataStore> =
            Arc::new(SqliteStore::new(temp.path().join("metadata.db"), None).await.unwrap());
        let state = AppState::new(AppConfig::for_testing(), storage, metadata);

        let _held = state.lock_project("acme", "rocket").await;
        let same = state
            .project_locks
            .get(&("acme".to_string(), "rocket".to_string()))
            .map(|lock| Arc::clone(lock.value()))
            .unwrap();
        assert!(same.try_lock().is_err());

        // Other projects commit independently.
        let _other = state.clone().lock_project("acme", "lander").await;
    }
}
