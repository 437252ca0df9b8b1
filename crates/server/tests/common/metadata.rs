//! Metadata test utilities.

use appdistrib_metadata::MetadataStore;
use appdistrib_metadata::repos::{AssetRepo, BuildRepo};

/// Build ids of a project, newest first.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub async fn build_ids(metadata: &dyn MetadataStore, organization: &str, project: &str) -> Vec<i64> {
    metadata
        .list_builds_with_assets(organization, project)
        .await
        .expect("Failed to list builds")
        .into_iter()
        .map(|b| b.build_id)
        .collect()
}

/// Whether an asset row exists.
#[allow(dead_code)]
pub async fn asset_exists(metadata: &dyn MetadataStore, asset_id: &str) -> bool {
    metadata
        .get_asset(asset_id)
        .await
        .expect("Failed to get asset")
        .is_some()
}
