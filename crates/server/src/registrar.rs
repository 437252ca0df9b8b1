//! Build registrar and write-time retention.

use crate::auth::ProjectScope;
use crate::error::{ApiError, ApiResult};
use crate::publisher::ManifestPublisher;
use crate::state::AppState;
use appdistrib_core::hash::AssetHashes;
use appdistrib_core::{AssetKey, BuildId, DEFAULT_MIME_TYPE};
use appdistrib_metadata::models::{BuildWithAssetRow, NewAsset, NewBuild, ProjectRow};
use appdistrib_metadata::repos::{AssetRepo, BuildRepo};
use time::OffsetDateTime;
use tracing::instrument;

/// A verified upload ready to be registered.
#[derive(Clone, Debug)]
pub struct BuildRegistration {
    pub build_id: BuildId,
    pub key: AssetKey,
    pub filename: String,
    pub hashes: AssetHashes,
    pub size: u64,
    /// Raw manifest JSON, or `null`.
    pub manifest: String,
    pub changelog: Option<String>,
    pub description: Option<String>,
    pub keep: bool,
}

/// Outcome of [`create_build`].
#[derive(Clone, Debug)]
pub struct RegisteredBuild {
    pub build: BuildWithAssetRow,
    /// Ephemeral builds removed by retention, oldest first.
    pub pruned: Vec<BuildId>,
}

impl RegisteredBuild {
    /// False if retention removed the new build itself (historical = 0).
    pub fn survived(&self) -> bool {
        self.pruned
            .iter()
            .all(|id| id.as_i64() != self.build.build_id)
    }
}

/// Peek at the next build id of a project without reserving it.
pub async fn next_build_id(state: &AppState, scope: &ProjectScope) -> ApiResult<BuildId> {
    let next = state
        .metadata
        .next_build_id(scope.organization_id(), scope.project_id())
        .await?;
    Ok(BuildId::from_i64(next)?)
}

/// Register a build for an asset that is already promoted, then enforce
/// retention for the project.
///
/// A taken build id is rejected with a conflict. Whenever the build cannot
/// be inserted the asset row is still recorded, so the orphan sweep can
/// reclaim the blob. Callers hold the project lock.
#[instrument(skip_all, fields(organization = %scope.organization_id(), project = %scope.project_id(), build_id = %registration.build_id))]
pub async fn create_build(
    state: &AppState,
    scope: &ProjectScope,
    registration: BuildRegistration,
) -> ApiResult<RegisteredBuild> {
    let now = OffsetDateTime::now_utc();
    let hashes = serde_json::to_string(&registration.hashes)
        .map_err(|e| ApiError::Internal(format!("failed to encode hashes: {e}")))?;
    let size_bytes = i64::try_from(registration.size)
        .map_err(|_| ApiError::BadRequest(format!("size too large: {}", registration.size)))?;

    let asset = NewAsset {
        asset_id: registration.key.to_hex(),
        filename: registration.filename.clone(),
        mime_type: DEFAULT_MIME_TYPE.to_string(),
        hashes: hashes.clone(),
        size_bytes,
        created_at: now,
    };
    let build = NewBuild {
        organization_id: scope.organization_id().to_string(),
        project_id: scope.project_id().to_string(),
        build_id: registration.build_id.as_i64(),
        manifest: registration.manifest,
        changelog: registration.changelog,
        description: registration.description,
        keep: registration.keep,
        created_at: now,
    };

    let row = match state.metadata.create_build_with_asset(&asset, &build).await {
        Ok(row) => row,
        Err(e) => {
            // The blob is already promoted but the transaction rolled back
            // its row; without one the orphan sweep cannot find it.
            if let Err(upsert_err) = state.metadata.upsert_asset(&asset).await {
                tracing::error!(
                    asset = %asset.asset_id,
                    error = %upsert_err,
                    "Failed to record asset of rejected build"
                );
            }
            if e.is_conflict() {
                return Err(ApiError::Conflict(format!(
                    "build {} already exists",
                    registration.build_id
                )));
            }
            return Err(e.into());
        }
    };

    crate::metrics::BUILDS_CREATED.inc();
    tracing::info!(asset = %asset.asset_id, keep = row.keep, "Build registered");

    // The build is committed at this point; retention failures only delay pruning.
    let pruned = match enforce_retention(state, &scope.project).await {
        Ok(pruned) => pruned,
        Err(e) => {
            tracing::warn!(error = %e, "Retention enforcement failed");
            Vec::new()
        }
    };

    Ok(RegisteredBuild {
        build: BuildWithAssetRow {
            build_id: row.build_id,
            asset_id: row.asset_id,
            manifest: row.manifest,
            changelog: row.changelog,
            keep: row.keep,
            created_at: row.created_at,
            filename: Some(asset.filename),
            hashes: Some(hashes),
            size_bytes: Some(size_bytes),
        },
        pruned,
    })
}

/// Delete the oldest ephemeral builds beyond the project's `historical`
/// limit, with their manifests and changelogs. Assets are left to the
/// orphan sweep.
#[instrument(skip_all, fields(organization = %project.organization_id, project = %project.project_id))]
pub async fn enforce_retention(state: &AppState, project: &ProjectRow) -> ApiResult<Vec<BuildId>> {
    let org_id = project.organization_id.as_str();
    let project_id = project.project_id.as_str();

    let ephemeral = state
        .metadata
        .list_ephemeral_builds(org_id, project_id)
        .await?;
    let limit = usize::try_from(project.historical).unwrap_or(0);
    let excess = ephemeral.len().saturating_sub(limit);
    if excess == 0 {
        return Ok(Vec::new());
    }

    let publisher = ManifestPublisher::new(state);
    let mut pruned = Vec::with_capacity(excess);
    for build in ephemeral.iter().take(excess) {
        let build_id = BuildId::from_i64(build.build_id)?;
        publisher
            .delete_build_files(org_id, project_id, build_id)
            .await?;
        state
            .metadata
            .delete_build(org_id, project_id, build.build_id)
            .await?;
        crate::metrics::BUILDS_PRUNED.inc();
        pruned.push(build_id);
    }

    tracing::info!(pruned = pruned.len(), "Ephemeral builds pruned");
    Ok(pruned)
}
