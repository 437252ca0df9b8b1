//! Manifest publisher.
//!
//! Materializes the read-only JSON and markdown documents served next to the
//! assets: one manifest and an optional changelog per build, plus one project
//! manifest listing every build. All documents are derived from metadata and
//! can be rebuilt at any time with [`ManifestPublisher::regenerate_project`].

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use appdistrib_core::hash::AssetHashes;
use appdistrib_core::layout::{self, changelog_path};
use appdistrib_core::manifest::{
    BuildEntry, BuildManifest, Descriptor, ProjectManifest, parse_manifest_blob, to_pretty_json,
};
use appdistrib_core::{AssetKey, BuildId};
use appdistrib_metadata::MetadataStore;
use appdistrib_metadata::models::{BuildWithAssetRow, OrganizationRow, ProjectRow};
use appdistrib_metadata::repos::BuildRepo;
use appdistrib_storage::AssetStore;
use bytes::Bytes;
use tracing::instrument;

/// Writes and removes the published documents of a project.
pub struct ManifestPublisher<'a> {
    storage: &'a dyn AssetStore,
    metadata: &'a dyn MetadataStore,
    public_path_prefix: &'a str,
}

impl<'a> ManifestPublisher<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self {
            storage: state.storage.as_ref(),
            metadata: state.metadata.as_ref(),
            public_path_prefix: &state.config.server.public_path_prefix,
        }
    }

    /// Render the per-build manifest. Returns `None` for a build that has
    /// lost its asset.
    pub fn render_build_manifest(&self, build: &BuildWithAssetRow) -> ApiResult<Option<Vec<u8>>> {
        let (Some(asset_id), Some(filename), Some(hashes), Some(size)) = (
            build.asset_id.as_deref(),
            build.filename.as_deref(),
            build.hashes.as_deref(),
            build.size_bytes,
        ) else {
            return Ok(None);
        };

        let key = AssetKey::from_hex(asset_id)?;
        let hashes: AssetHashes = serde_json::from_str(hashes)
            .map_err(|e| ApiError::Internal(format!("corrupt hashes for asset {asset_id}: {e}")))?;
        // A blob that no longer parses is published as null rather than
        // blocking the rest of the manifest.
        let manifest = parse_manifest_blob(&build.manifest).ok();

        let doc = BuildManifest {
            id: BuildId::from_i64(build.build_id)?,
            path: layout::public_asset_path(self.public_path_prefix, &key, filename),
            manifest,
            size: u64::try_from(size).unwrap_or_default(),
            hashes,
            created_at: build.created_at.unix_timestamp(),
        };
        Ok(Some(to_pretty_json(&doc)?))
    }

    /// Write the manifest and, if present, the changelog of one build.
    #[instrument(skip(self, build), fields(organization = %organization, project = %project, build_id = build.build_id))]
    pub async fn publish_build(
        &self,
        organization: &str,
        project: &str,
        build: &BuildWithAssetRow,
    ) -> ApiResult<()> {
        let build_id = BuildId::from_i64(build.build_id)?;
        let Some(manifest) = self.render_build_manifest(build)? else {
            return Err(ApiError::Internal(format!(
                "build {build_id} has no asset to publish"
            )));
        };

        self.storage
            .put_document(
                &layout::build_manifest_path(organization, project, build_id),
                Bytes::from(manifest),
            )
            .await?;

        if let Some(changelog) = build.changelog.as_deref().filter(|c| !c.is_empty()) {
            self.storage
                .put_document(
                    &changelog_path(organization, project, build_id),
                    Bytes::from(changelog.to_owned()),
                )
                .await?;
        }
        Ok(())
    }

    /// Remove the derived documents of one build. Missing files are ignored.
    pub async fn delete_build_files(
        &self,
        organization: &str,
        project: &str,
        build_id: BuildId,
    ) -> ApiResult<()> {
        self.storage
            .delete_document(&layout::build_manifest_path(organization, project, build_id))
            .await?;
        self.storage
            .delete_document(&changelog_path(organization, project, build_id))
            .await?;
        Ok(())
    }

    /// Rewrite the project manifest.
    ///
    /// Builds that lost their asset row or stored blob are repaired on the
    /// way: their documents and rows are deleted instead of being listed. Returns the builds that
    /// were listed, newest first.
    #[instrument(skip_all, fields(organization = %organization.organization_id, project = %project.project_id))]
    pub async fn publish_project(
        &self,
        organization: &OrganizationRow,
        project: &ProjectRow,
    ) -> ApiResult<Vec<BuildWithAssetRow>> {
        let org_id = organization.organization_id.as_str();
        let project_id = project.project_id.as_str();

        let mut listed = Vec::new();
        for build in self
            .metadata
            .list_builds_with_assets(org_id, project_id)
            .await?
        {
            if !self.asset_present(&build).await? {
                self.heal_dangling_build(org_id, project_id, build.build_id)
                    .await?;
                continue;
            }
            listed.push(build);
        }

        let entries = listed
            .iter()
            .map(|b| {
                Ok(BuildEntry {
                    id: BuildId::from_i64(b.build_id)?,
                    created_at: b.created_at.unix_timestamp(),
                })
            })
            .collect::<ApiResult<Vec<_>>>()?;

        let doc = ProjectManifest::new(
            Descriptor {
                name: organization.name.clone(),
                description: organization.description.clone(),
            },
            Descriptor {
                name: project.name.clone(),
                description: project.description.clone(),
            },
            entries,
        );
        self.storage
            .put_document(
                &layout::project_manifest_path(org_id, project_id),
                Bytes::from(to_pretty_json(&doc)?),
            )
            .await?;

        Ok(listed)
    }

    /// Rebuild every document of a project from metadata. Idempotent.
    /// Returns the number of builds published.
    pub async fn regenerate_project(
        &self,
        organization: &OrganizationRow,
        project: &ProjectRow,
    ) -> ApiResult<usize> {
        let builds = self.publish_project(organization, project).await?;
        for build in &builds {
            self.publish_build(&organization.organization_id, &project.project_id, build)
                .await?;
        }
        crate::metrics::MANIFESTS_REGENERATED.inc();
        tracing::info!(
            organization = %organization.organization_id,
            project = %project.project_id,
            builds = builds.len(),
            "Manifests regenerated"
        );
        Ok(builds.len())
    }

    async fn asset_present(&self, build: &BuildWithAssetRow) -> ApiResult<bool> {
        let (Some(asset_id), Some(_)) = (build.asset_id.as_deref(), build.filename.as_deref())
        else {
            return Ok(false);
        };
        let key = AssetKey::from_hex(asset_id)?;
        Ok(self.storage.contains(&key).await?)
    }

    async fn heal_dangling_build(
        &self,
        organization: &str,
        project: &str,
        build_id: i64,
    ) -> ApiResult<()> {
        tracing::warn!(
            organization = %organization,
            project = %project,
            build_id,
            "Build lost its asset, removing it"
        );
        self.delete_build_files(organization, project, BuildId::from_i64(build_id)?)
            .await?;
        self.metadata
            .delete_build(organization, project, build_id)
            .await?;
        Ok(())
    }
}
