//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum size of a single upload chunk in bytes.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
    /// URL prefix under which the storage root is served, used for asset
    /// paths in build manifests.
    #[serde(default = "default_public_path_prefix")]
    pub public_path_prefix: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// SECURITY: When enabled, ensure this endpoint is network-restricted
    /// to authorized Prometheus scraper IPs only at the infrastructure level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_chunk_size() -> u64 {
    crate::MAX_CHUNK_SIZE
}

fn default_public_path_prefix() -> String {
    "/storage".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_chunk_size: default_max_chunk_size(),
            public_path_prefix: default_public_path_prefix(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_chunk_size == 0 {
            return Err("server.max_chunk_size must be positive".to_string());
        }
        if !self.public_path_prefix.starts_with('/') {
            return Err(format!(
                "server.public_path_prefix must start with '/': {}",
                self.public_path_prefix
            ));
        }
        Ok(())
    }
}

/// Asset storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding assets, manifests, changelogs and staging files.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
    /// Secret mixed into the keyed digest that addresses every asset.
    /// Changing it changes every future storage key, so keep it stable.
    /// WARNING: Prefer APPDISTRIB_STORAGE__SECRET_KEY over storing it in config.
    pub secret_key: String,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data/storage")
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.secret_key.is_empty() {
            return Err("storage.secret_key must not be empty".to_string());
        }
        Ok(())
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Seconds a query may wait for the database connection before it
        /// fails. Running queries are not cancelled.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(600)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Sqlite {
                query_timeout_secs: Some(0),
                ..
            } => Err("metadata.query_timeout_secs cannot be 0".to_string()),
            Self::Sqlite { .. } => Ok(()),
        }
    }
}

/// Token authentication configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Server-wide secret combined with each project key to hash tokens.
    /// WARNING: Prefer APPDISTRIB_AUTH__SECRET_KEY over storing it in config.
    pub secret_key: String,
}

impl AuthConfig {
    /// Validate auth configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.secret_key.is_empty() {
            return Err("auth.secret_key must not be empty".to_string());
        }
        Ok(())
    }
}

/// Background garbage collection configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GcConfig {
    /// Run the background sweeps (default: true).
    #[serde(default = "default_gc_enabled")]
    pub enabled: bool,
    /// Interval between orphan asset sweeps in seconds (default: 300).
    #[serde(default = "default_orphan_sweep_interval_secs")]
    pub orphan_sweep_interval_secs: u64,
    /// Maximum orphan assets reclaimed per sweep (default: 10).
    #[serde(default = "default_orphan_batch_size")]
    pub orphan_batch_size: u32,
    /// Interval between empty directory sweeps in seconds (default: 86400).
    #[serde(default = "default_empty_dir_sweep_interval_secs")]
    pub empty_dir_sweep_interval_secs: u64,
}

fn default_gc_enabled() -> bool {
    true
}

fn default_orphan_sweep_interval_secs() -> u64 {
    300
}

fn default_orphan_batch_size() -> u32 {
    10
}

fn default_empty_dir_sweep_interval_secs() -> u64 {
    86400
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            enabled: default_gc_enabled(),
            orphan_sweep_interval_secs: default_orphan_sweep_interval_secs(),
            orphan_batch_size: default_orphan_batch_size(),
            empty_dir_sweep_interval_secs: default_empty_dir_sweep_interval_secs(),
        }
    }
}

impl GcConfig {
    /// Validate GC configuration. A zero interval would spin the sweep loops.
    pub fn validate(&self) -> Result<(), String> {
        if self.orphan_sweep_interval_secs == 0 {
            return Err("gc.orphan_sweep_interval_secs cannot be 0".to_string());
        }
        if self.empty_dir_sweep_interval_secs == 0 {
            return Err("gc.empty_dir_sweep_interval_secs cannot be 0".to_string());
        }
        if self.orphan_batch_size == 0 {
            return Err("gc.orphan_batch_size cannot be 0".to_string());
        }
        Ok(())
    }

    /// Orphan sweep interval.
    pub fn orphan_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.orphan_sweep_interval_secs)
    }

    /// Empty directory sweep interval.
    pub fn empty_dir_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.empty_dir_sweep_interval_secs)
    }
}

/// Retention defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Ephemeral builds retained per project unless the project overrides it.
    #[serde(default = "default_historical")]
    pub default_historical: u32,
}

fn default_historical() -> u32 {
    100
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            default_historical: default_historical(),
        }
    }
}

/// A project ensured to exist at startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectSeed {
    pub organization: String,
    pub organization_name: Option<String>,
    pub project: String,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Overrides `retention.default_historical` for this project.
    pub historical: Option<u32>,
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Asset storage configuration (secret_key required).
    pub storage: StorageConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Token authentication configuration (required).
    pub auth: AuthConfig,
    /// Garbage collection configuration.
    #[serde(default)]
    pub gc: GcConfig,
    /// Retention defaults.
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Projects seeded at startup.
    #[serde(default)]
    pub projects: Vec<ProjectSeed>,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses fixed, publicly known secrets.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig {
                path: default_storage_path(),
                secret_key: "test-storage-secret".to_string(),
            },
            metadata: MetadataConfig::default(),
            auth: AuthConfig {
                secret_key: "test-auth-secret".to_string(),
            },
            gc: GcConfig::default(),
            retention: RetentionConfig::default(),
            projects: Vec::new(),
        }
    }

    /// Validate every section, returning the first error.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.storage.validate()?;
        self.metadata.validate()?;
        self.auth.validate()?;
        self.gc.validate()?;
        for seed in &self.projects {
            crate::layout::validate_identifier(&seed.organization).map_err(|e| e.to_string())?;
            crate::layout::validate_identifier(&seed.project).map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let json = r#"{"storage": {"secret_key": "s"}, "auth": {"secret_key": "a"}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.server.public_path_prefix, "/storage");
        assert!(config.server.metrics_enabled);
        assert_eq!(config.storage.path, PathBuf::from("./data/storage"));
        assert_eq!(config.gc.orphan_sweep_interval_secs, 300);
        assert_eq!(config.gc.orphan_batch_size, 10);
        assert_eq!(config.gc.empty_dir_sweep_interval_secs, 86400);
        assert_eq!(config.retention.default_historical, 100);
        assert!(config.projects.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_secrets_rejected() {
        let json = r#"{"auth": {"secret_key": "a"}}"#;
        assert!(serde_json::from_str::<AppConfig>(json).is_err());

        let mut config = AppConfig::for_testing();
        config.storage.secret_key.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gc_zero_interval_rejected() {
        let config = GcConfig {
            orphan_sweep_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_seed_identifiers_validated() {
        let mut config = AppConfig::for_testing();
        config.projects.push(ProjectSeed {
            organization: "acme".to_string(),
            organization_name: None,
            project: "../escape".to_string(),
            name: None,
            description: None,
            historical: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_metadata_config_tagged() {
        let json = r#"{"type": "sqlite", "path": "/tmp/m.db"}"#;
        let MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } = serde_json::from_str(json).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/m.db"));
        assert_eq!(query_timeout_secs, Some(600));

        let zero: MetadataConfig =
            serde_json::from_str(r#"{"type": "sqlite", "path": "/tmp/m.db", "query_timeout_secs": 0}"#)
                .unwrap();
        assert!(zero.validate().is_err());
    }
}
