//! Asset repository.
//!
//! An asset is an orphan when it carries no retention hold and no build
//! references it.

use crate::error::MetadataResult;
use crate::models::{AssetRow, NewAsset};
use async_trait::async_trait;

/// Repository for assets.
#[async_trait]
pub trait AssetRepo: Send + Sync {
    /// Get an asset by its hex key.
    async fn get_asset(&self, asset_id: &str) -> MetadataResult<Option<AssetRow>>;

    /// Insert an asset, or refresh the filename of an existing one.
    async fn upsert_asset(&self, asset: &NewAsset) -> MetadataResult<()>;

    /// Oldest orphan assets, at most `limit`.
    async fn find_orphan_assets(&self, limit: u32) -> MetadataResult<Vec<AssetRow>>;

    /// Re-check orphan status of a single asset.
    async fn is_orphan_asset(&self, asset_id: &str) -> MetadataResult<bool>;

    /// Delete the asset row only if it is still an orphan.
    async fn delete_asset_if_orphaned(&self, asset_id: &str) -> MetadataResult<bool>;

    /// Place a retention hold on an asset.
    async fn hold_asset(
        &self,
        asset_id: &str,
        organization_id: &str,
        project_id: Option<&str>,
    ) -> MetadataResult<()>;

    /// Clear the retention hold on an asset.
    async fn release_asset(&self, asset_id: &str) -> MetadataResult<()>;
}
