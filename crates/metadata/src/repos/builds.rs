//! Build repository.

use crate::error::MetadataResult;
use crate::models::{BuildRow, BuildWithAssetRow, NewAsset, NewBuild};
use async_trait::async_trait;

/// Repository for builds.
#[async_trait]
pub trait BuildRepo: Send + Sync {
    /// Next auto-assigned build id: one past the larger of the highest
    /// existing id and the project's high-water mark.
    ///
    /// Not reserved: concurrent callers may receive the same value, and the
    /// loser is rejected by [`BuildRepo::create_build_with_asset`].
    async fn next_build_id(&self, organization_id: &str, project_id: &str) -> MetadataResult<i64>;

    /// Get a build.
    async fn get_build(
        &self,
        organization_id: &str,
        project_id: &str,
        build_id: i64,
    ) -> MetadataResult<Option<BuildRow>>;

    /// Check whether a build id is taken.
    async fn build_exists(
        &self,
        organization_id: &str,
        project_id: &str,
        build_id: i64,
    ) -> MetadataResult<bool>;

    /// Upsert the asset, insert the build and advance the project's
    /// high-water mark in one transaction.
    ///
    /// Fails with `AlreadyExists` if the build id is taken; nothing is
    /// written in that case.
    async fn create_build_with_asset(
        &self,
        asset: &NewAsset,
        build: &NewBuild,
    ) -> MetadataResult<BuildRow>;

    /// All builds of a project joined with their assets, newest id first.
    async fn list_builds_with_assets(
        &self,
        organization_id: &str,
        project_id: &str,
    ) -> MetadataResult<Vec<BuildWithAssetRow>>;

    /// Builds not marked `keep`, oldest first (creation time, then id).
    async fn list_ephemeral_builds(
        &self,
        organization_id: &str,
        project_id: &str,
    ) -> MetadataResult<Vec<BuildRow>>;

    /// Delete a build row. Returns false if it did not exist.
    async fn delete_build(
        &self,
        organization_id: &str,
        project_id: &str,
        build_id: i64,
    ) -> MetadataResult<bool>;
}
