//! Server test utilities.

use appdistrib_core::config::{AppConfig, MetadataConfig, ProjectSeed, StorageConfig};
use appdistrib_core::{ClientMessage, ServerMessage};
use appdistrib_metadata::{MetadataStore, SqliteStore};
use appdistrib_server::auth::authorize_project;
use appdistrib_server::bootstrap::{create_project, create_token};
use appdistrib_server::{ApiResult, AppState, Inbound, IngestSession, create_router, run_ingest};
use appdistrib_storage::{AssetStore, FilesystemBackend};
use bytes::Bytes;
use futures::channel::mpsc;
use futures::{StreamExt, stream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Organization seeded into every test server.
pub const TEST_ORGANIZATION: &str = "acme";

/// Project seeded into every test server.
pub const TEST_PROJECT: &str = "rocket";

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    /// Plaintext token for the seeded project.
    pub token: String,
    sqlite: Arc<SqliteStore>,
    storage_root: PathBuf,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage and a seeded project.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(modifier, |store| store).await
    }

    /// Create a test server whose storage is wrapped by `wrap`.
    pub async fn with_storage<W>(wrap: W) -> Self
    where
        W: FnOnce(Arc<dyn AssetStore>) -> Arc<dyn AssetStore>,
    {
        Self::build(|_| {}, wrap).await
    }

    async fn build<F, W>(modifier: F, wrap: W) -> Self
    where
        F: FnOnce(&mut AppConfig),
        W: FnOnce(Arc<dyn AssetStore>) -> Arc<dyn AssetStore>,
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let storage_root = temp_dir.path().join("storage");
        let storage: Arc<dyn AssetStore> = Arc::new(
            FilesystemBackend::new(&storage_root)
                .await
                .expect("Failed to create storage backend"),
        );

        let db_path = temp_dir.path().join("metadata.db");
        let sqlite = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create metadata store"),
        );
        let metadata: Arc<dyn MetadataStore> = sqlite.clone();

        let mut config = AppConfig::for_testing();
        config.storage = StorageConfig {
            path: storage_root.clone(),
            secret_key: config.storage.secret_key.clone(),
        };
        config.metadata = MetadataConfig::Sqlite {
            path: db_path,
            query_timeout_secs: None,
        };
        config.gc.enabled = false;
        modifier(&mut config);

        let seed = ProjectSeed {
            organization: TEST_ORGANIZATION.to_string(),
            organization_name: Some("Acme".to_string()),
            project: TEST_PROJECT.to_string(),
            name: Some("Rocket".to_string()),
            description: Some("Test project".to_string()),
            historical: None,
        };
        create_project(
            metadata.as_ref(),
            &seed,
            config.retention.default_historical,
        )
        .await
        .expect("Failed to seed project");
        let token = create_token(
            metadata.as_ref(),
            &config.auth.secret_key,
            TEST_ORGANIZATION,
            TEST_PROJECT,
            Some("test".to_string()),
            None,
        )
        .await
        .expect("Failed to create token")
        .plaintext;

        let state = AppState::new(config, wrap(storage), metadata);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            token,
            sqlite,
            storage_root,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Raw pool, for setting up states the repos cannot produce.
    pub fn pool(&self) -> &sqlx::SqlitePool {
        self.sqlite.pool()
    }

    /// Storage root directory.
    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Set the retention limit of the seeded project.
    pub async fn set_historical(&self, historical: i64) {
        use appdistrib_metadata::repos::ProjectRepo;
        self.state
            .metadata
            .set_project_historical(TEST_ORGANIZATION, TEST_PROJECT, historical)
            .await
            .expect("Failed to set historical");
    }

    /// Open an ingest session for the seeded project.
    pub async fn session(&self) -> IngestSession {
        let scope = authorize_project(&self.state, TEST_ORGANIZATION, TEST_PROJECT, &self.token)
            .await
            .expect("Failed to authorize test project");
        IngestSession::new(self.state.clone(), scope)
    }

    /// Drive a full upload through the transport-agnostic driver. Returns
    /// every server message and the driver result.
    pub async fn run(&self, events: Vec<Inbound>) -> (Vec<ServerMessage>, ApiResult<String>) {
        let session = self.session().await;
        let (tx, rx) = mpsc::unbounded();
        let result = run_ingest(session, stream::iter(events), tx).await;
        let replies = rx.collect::<Vec<_>>().await;
        (replies, result)
    }

    /// Upload `data` in `chunk_size` pieces with a correct footer.
    pub async fn upload(
        &self,
        data: &[u8],
        filename: &str,
        build_id: Option<u64>,
        chunk_size: usize,
    ) -> (Vec<ServerMessage>, ApiResult<String>) {
        let header = super::fixtures::header_for(data, filename, build_id);
        self.run(upload_events(header, data, chunk_size, super::fixtures::footer_for(data)))
            .await
    }

    /// Read a published document.
    pub fn read_document(&self, path: &str) -> Option<Vec<u8>> {
        std::fs::read(self.storage_root.join(path)).ok()
    }

    /// Files left in the staging directory.
    pub fn staging_files(&self) -> usize {
        std::fs::read_dir(self.storage_root.join("staging"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

/// Header, chunks, footer and end for one upload.
#[allow(dead_code)]
pub fn upload_events(
    header: appdistrib_core::BuildHeader,
    data: &[u8],
    chunk_size: usize,
    footer: appdistrib_core::BuildFooter,
) -> Vec<Inbound> {
    let mut events = vec![Inbound::Message(ClientMessage::Header(header))];
    events.extend(
        data.chunks(chunk_size)
            .map(|c| Inbound::Message(ClientMessage::Chunk(Bytes::copy_from_slice(c)))),
    );
    events.push(Inbound::Message(ClientMessage::Footer(footer)));
    events.push(Inbound::End);
    events
}
