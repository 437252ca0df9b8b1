//! Metadata store abstraction and SQLite implementation for AppDistrib.
//!
//! This crate provides the relational data model:
//! - Organizations and projects, with per-project build id high-water marks
//! - Project-bound tokens (hashed)
//! - Assets with optional retention holds
//! - Builds, their retention ordering and the asset joins used for manifests

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use store::{MetadataStore, SqliteStore};

use appdistrib_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            let store = SqliteStore::new(path, *query_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
