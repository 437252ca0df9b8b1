//! Project seeding and operator commands.

use anyhow::{Context, Result, bail};
use appdistrib_core::AssetKey;
use appdistrib_core::config::{AppConfig, ProjectSeed};
use appdistrib_core::layout::validate_identifier;
use appdistrib_core::token::{GeneratedToken, generate_project_key, generate_token};
use appdistrib_metadata::MetadataStore;
use appdistrib_metadata::models::{OrganizationRow, ProjectRow, TokenRow};
use appdistrib_metadata::repos::{AssetRepo, OrganizationRepo, ProjectRepo, TokenRepo};
use time::{Duration, OffsetDateTime};

/// Ensure every `[[projects]]` entry of the configuration exists.
///
/// Missing organizations and projects are created. For existing projects
/// only `historical` is reconciled, and only when the seed sets it.
pub async fn ensure_project_seeds(metadata: &dyn MetadataStore, config: &AppConfig) -> Result<()> {
    for seed in &config.projects {
        let existing = metadata
            .get_project(&seed.organization, &seed.project)
            .await?;
        match existing {
            None => {
                create_project(metadata, seed, config.retention.default_historical).await?;
            }
            Some(project) => {
                if let Some(historical) = seed.historical.map(i64::from)
                    && historical != project.historical
                {
                    metadata
                        .set_project_historical(&seed.organization, &seed.project, historical)
                        .await?;
                    tracing::info!(
                        organization = %seed.organization,
                        project = %seed.project,
                        historical,
                        "Project retention updated"
                    );
                } else {
                    tracing::debug!(
                        organization = %seed.organization,
                        project = %seed.project,
                        "Project already exists"
                    );
                }
            }
        }
    }
    Ok(())
}

/// Create a project, and its organization if that does not exist yet.
/// Fails if the project already exists.
pub async fn create_project(
    metadata: &dyn MetadataStore,
    seed: &ProjectSeed,
    default_historical: u32,
) -> Result<ProjectRow> {
    validate_identifier(&seed.organization)?;
    validate_identifier(&seed.project)?;
    let now = OffsetDateTime::now_utc();

    if metadata.get_organization(&seed.organization).await?.is_none() {
        let organization = OrganizationRow {
            organization_id: seed.organization.clone(),
            name: seed
                .organization_name
                .clone()
                .unwrap_or_else(|| seed.organization.clone()),
            description: None,
            created_at: now,
            updated_at: now,
        };
        metadata.create_organization(&organization).await?;
        tracing::info!(organization = %seed.organization, "Organization created");
    }

    if metadata
        .get_project(&seed.organization, &seed.project)
        .await?
        .is_some()
    {
        bail!(
            "project '{}/{}' already exists",
            seed.organization,
            seed.project
        );
    }

    let project = ProjectRow {
        organization_id: seed.organization.clone(),
        project_id: seed.project.clone(),
        project_key: generate_project_key(),
        name: seed.name.clone().unwrap_or_else(|| seed.project.clone()),
        description: seed.description.clone(),
        historical: i64::from(seed.historical.unwrap_or(default_historical)),
        last_build_id: 0,
        created_at: now,
        updated_at: now,
    };
    metadata.create_project(&project).await?;
    tracing::info!(
        organization = %project.organization_id,
        project = %project.project_id,
        historical = project.historical,
        "Project created"
    );
    Ok(project)
}

/// Mint a token for a project. Only the hash is stored; the returned
/// plaintext cannot be recovered later.
pub async fn create_token(
    metadata: &dyn MetadataStore,
    auth_secret: &str,
    organization_id: &str,
    project_id: &str,
    description: Option<String>,
    expires_in_days: Option<u32>,
) -> Result<GeneratedToken> {
    let project = metadata
        .get_project(organization_id, project_id)
        .await?
        .with_context(|| format!("project '{organization_id}/{project_id}' not found"))?;

    let token = generate_token(auth_secret, &project.project_key)?;
    let now = OffsetDateTime::now_utc();
    let row = TokenRow {
        token_hash: token.hash.clone(),
        organization_id: organization_id.to_string(),
        project_id: project_id.to_string(),
        description,
        expires_at: expires_in_days.map(|days| now + Duration::days(i64::from(days))),
        created_at: now,
        last_used_at: None,
    };
    metadata.create_token(&row).await?;
    tracing::info!(
        organization = %organization_id,
        project = %project_id,
        expires_at = ?row.expires_at,
        "Token created"
    );
    Ok(token)
}

/// Accept an asset as its hex id or as the base64 key returned to uploaders.
fn resolve_asset_id(asset: &str) -> Result<String> {
    let key = AssetKey::from_hex(asset)
        .or_else(|_| AssetKey::from_base64(asset))
        .with_context(|| format!("'{asset}' is neither a hex asset id nor a base64 key"))?;
    Ok(key.to_hex())
}

/// Protect an asset from the orphan sweep by associating it with an
/// organization, and optionally a project. Returns the asset id.
pub async fn hold_asset(
    metadata: &dyn MetadataStore,
    asset: &str,
    organization_id: &str,
    project_id: Option<&str>,
) -> Result<String> {
    let asset_id = resolve_asset_id(asset)?;
    metadata
        .get_organization(organization_id)
        .await?
        .with_context(|| format!("organization '{organization_id}' not found"))?;
    if let Some(project_id) = project_id {
        metadata
            .get_project(organization_id, project_id)
            .await?
            .with_context(|| format!("project '{organization_id}/{project_id}' not found"))?;
    }

    metadata
        .hold_asset(&asset_id, organization_id, project_id)
        .await
        .with_context(|| format!("failed to hold asset {asset_id}"))?;
    tracing::info!(
        asset = %asset_id,
        organization = %organization_id,
        project = ?project_id,
        "Asset held"
    );
    Ok(asset_id)
}

/// Clear the hold on an asset. Unreferenced, it becomes an orphan again.
pub async fn release_asset(metadata: &dyn MetadataStore, asset: &str) -> Result<String> {
    let asset_id = resolve_asset_id(asset)?;
    metadata
        .release_asset(&asset_id)
        .await
        .with_context(|| format!("failed to release asset {asset_id}"))?;
    tracing::info!(asset = %asset_id, "Asset released");
    Ok(asset_id)
}
