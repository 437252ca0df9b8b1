//! Asset storage for the AppDistrib build server.
//!
//! This crate provides:
//! - Private staging files for in-flight uploads
//! - A sharded content-addressable store keyed by the keyed asset digest
//! - Atomic writes of published manifest and changelog documents
//! - Empty directory sweeping for garbage collection

pub mod backends;
pub mod error;
pub mod staging;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use error::{StorageError, StorageResult};
pub use staging::{StagedFile, StagingFile};
pub use traits::{AssetStore, PromoteOutcome};

use appdistrib_core::config::StorageConfig;
use std::sync::Arc;

/// Create an asset store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn AssetStore>> {
    config.validate().map_err(StorageError::Config)?;
    let backend = FilesystemBackend::new(&config.path).await?;
    Ok(Arc::new(backend))
}
