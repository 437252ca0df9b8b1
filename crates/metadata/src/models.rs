//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use time::OffsetDateTime;

// =============================================================================
// Tenancy
// =============================================================================

/// Organization record.
#[derive(Debug, Clone, FromRow)]
pub struct OrganizationRow {
    pub organization_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Project record. `(organization_id, project_id)` is the primary key.
#[derive(Debug, Clone, FromRow)]
pub struct ProjectRow {
    pub organization_id: String,
    pub project_id: String,
    /// Random secret binding tokens to this project (base64).
    pub project_key: String,
    pub name: String,
    pub description: Option<String>,
    /// Maximum number of retained ephemeral builds.
    pub historical: i64,
    /// High-water mark of assigned build ids; survives pruning.
    pub last_build_id: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Token record. Only the keyed hash of the token is stored.
#[derive(Debug, Clone, FromRow)]
pub struct TokenRow {
    pub token_hash: String,
    pub organization_id: String,
    pub project_id: String,
    pub description: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub last_used_at: Option<OffsetDateTime>,
}

impl TokenRow {
    /// Whether the token has expired at `now`.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

// =============================================================================
// Assets and builds
// =============================================================================

/// Asset record, keyed by the hex storage key.
#[derive(Debug, Clone, FromRow)]
pub struct AssetRow {
    pub asset_id: String,
    pub filename: String,
    pub mime_type: String,
    /// JSON object `{crc32, md5, sha1, sha3}`.
    pub hashes: String,
    pub size_bytes: i64,
    /// Retention hold. Held assets are never orphaned.
    pub organization_id: Option<String>,
    pub project_id: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Asset to insert or refresh.
#[derive(Debug, Clone)]
pub struct NewAsset {
    pub asset_id: String,
    pub filename: String,
    pub mime_type: String,
    pub hashes: String,
    pub size_bytes: i64,
    pub created_at: OffsetDateTime,
}

/// Build record.
#[derive(Debug, Clone, FromRow)]
pub struct BuildRow {
    pub organization_id: String,
    pub project_id: String,
    pub build_id: i64,
    /// Nullable so that dangling builds can be detected and repaired.
    pub asset_id: Option<String>,
    pub manifest: String,
    pub changelog: Option<String>,
    pub description: Option<String>,
    pub keep: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Build to insert.
#[derive(Debug, Clone)]
pub struct NewBuild {
    pub organization_id: String,
    pub project_id: String,
    pub build_id: i64,
    pub manifest: String,
    pub changelog: Option<String>,
    pub description: Option<String>,
    pub keep: bool,
    pub created_at: OffsetDateTime,
}

/// Build joined with its asset, as needed to render manifests.
///
/// The asset columns are `None` when the build has lost its asset.
#[derive(Debug, Clone, FromRow)]
pub struct BuildWithAssetRow {
    pub build_id: i64,
    pub asset_id: Option<String>,
    pub manifest: String,
    pub changelog: Option<String>,
    pub keep: bool,
    pub created_at: OffsetDateTime,
    pub filename: Option<String>,
    pub hashes: Option<String>,
    pub size_bytes: Option<i64>,
}
