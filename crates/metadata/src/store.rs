//! Metadata store trait and SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{AssetRepo, BuildRepo, OrganizationRepo, ProjectRepo, TokenRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    OrganizationRepo + ProjectRepo + TokenRepo + AssetRepo + BuildRepo + Send + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store.
    ///
    /// `query_timeout_secs` bounds how long a query waits for the pooled
    /// connection before failing with a pool timeout (default 600).
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout_secs = query_timeout_secs.unwrap_or(600);

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // A single connection serializes writers, so transactions never
            // fail with "database is locked" under axum concurrency.
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(query_timeout_secs))
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!(
            path = %path.display(),
            query_timeout_secs,
            "SQLite metadata store ready"
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Insert an asset or refresh the display name of an existing one.
async fn upsert_asset_with<'e, E>(executor: E, asset: &crate::models::NewAsset) -> MetadataResult<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO assets (
            asset_id, filename, mime_type, hashes, size_bytes, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(asset_id) DO UPDATE SET
            filename = excluded.filename,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&asset.asset_id)
    .bind(&asset.filename)
    .bind(&asset.mime_type)
    .bind(&asset.hashes)
    .bind(asset.size_bytes)
    .bind(asset.created_at)
    .bind(asset.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use time::OffsetDateTime;

    #[async_trait]
    impl OrganizationRepo for SqliteStore {
        async fn create_organization(&self, organization: &OrganizationRow) -> MetadataResult<()> {
            let result = sqlx::query(
                "INSERT INTO organizations (organization_id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&organization.organization_id)
            .bind(&organization.name)
            .bind(&organization.description)
            .bind(organization.created_at)
            .bind(organization.updated_at)
            .execute(&self.pool)
            .await;

            match result.map_err(MetadataError::from) {
                Ok(_) => Ok(()),
                Err(e) if e.is_conflict() => Err(MetadataError::AlreadyExists(format!(
                    "organization '{}' already exists",
                    organization.organization_id
                ))),
                Err(e) => Err(e),
            }
        }

        async fn get_organization(
            &self,
            organization_id: &str,
        ) -> MetadataResult<Option<OrganizationRow>> {
            let row = sqlx::query_as::<_, OrganizationRow>(
                "SELECT * FROM organizations WHERE organization_id = ?",
            )
            .bind(organization_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn delete_organization(&self, organization_id: &str) -> MetadataResult<bool> {
            let result = sqlx::query("DELETE FROM organizations WHERE organization_id = ?")
                .bind(organization_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        }
    }

    #[async_trait]
    impl ProjectRepo for SqliteStore {
        async fn create_project(&self, project: &ProjectRow) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                INSERT INTO projects (
                    organization_id, project_id, project_key, name, description,
                    historical, last_build_id, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&project.organization_id)
            .bind(&project.project_id)
            .bind(&project.project_key)
            .bind(&project.name)
            .bind(&project.description)
            .bind(project.historical)
            .bind(project.last_build_id)
            .bind(project.created_at)
            .bind(project.updated_at)
            .execute(&self.pool)
            .await;

            match result.map_err(MetadataError::from) {
                Ok(_) => Ok(()),
                Err(e) if e.is_conflict() => Err(MetadataError::AlreadyExists(format!(
                    "project '{}/{}' already exists",
                    project.organization_id, project.project_id
                ))),
                Err(e) => Err(e),
            }
        }

        async fn get_project(
            &self,
            organization_id: &str,
            project_id: &str,
        ) -> MetadataResult<Option<ProjectRow>> {
            let row = sqlx::query_as::<_, ProjectRow>(
                "SELECT * FROM projects WHERE organization_id = ? AND project_id = ?",
            )
            .bind(organization_id)
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn set_project_historical(
            &self,
            organization_id: &str,
            project_id: &str,
            historical: i64,
        ) -> MetadataResult<()> {
            if historical < 0 {
                return Err(MetadataError::Constraint(format!(
                    "historical must not be negative: {historical}"
                )));
            }
            let result = sqlx::query(
                "UPDATE projects SET historical = ?, updated_at = ? WHERE organization_id = ? AND project_id = ?",
            )
            .bind(historical)
            .bind(OffsetDateTime::now_utc())
            .bind(organization_id)
            .bind(project_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "project '{organization_id}/{project_id}'"
                )));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl TokenRepo for SqliteStore {
        async fn create_token(&self, token: &TokenRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO tokens (
                    token_hash, organization_id, project_id, description,
                    expires_at, created_at, last_used_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&token.token_hash)
            .bind(&token.organization_id)
            .bind(&token.project_id)
            .bind(&token.description)
            .bind(token.expires_at)
            .bind(token.created_at)
            .bind(token.last_used_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_token_by_hash(&self, token_hash: &str) -> MetadataResult<Option<TokenRow>> {
            let row = sqlx::query_as::<_, TokenRow>("SELECT * FROM tokens WHERE token_hash = ?")
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn touch_token(&self, token_hash: &str, used_at: OffsetDateTime) -> MetadataResult<()> {
            sqlx::query("UPDATE tokens SET last_used_at = ? WHERE token_hash = ?")
                .bind(used_at)
                .bind(token_hash)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn delete_token(&self, token_hash: &str) -> MetadataResult<bool> {
            let result = sqlx::query("DELETE FROM tokens WHERE token_hash = ?")
                .bind(token_hash)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn list_tokens(
            &self,
            organization_id: &str,
            project_id: &str,
        ) -> MetadataResult<Vec<TokenRow>> {
            let rows = sqlx::query_as::<_, TokenRow>(
                "SELECT * FROM tokens WHERE organization_id = ? AND project_id = ? ORDER BY created_at",
            )
            .bind(organization_id)
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl AssetRepo for SqliteStore {
        async fn get_asset(&self, asset_id: &str) -> MetadataResult<Option<AssetRow>> {
            let row = sqlx::query_as::<_, AssetRow>("SELECT * FROM assets WHERE asset_id = ?")
                .bind(asset_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn upsert_asset(&self, asset: &NewAsset) -> MetadataResult<()> {
            upsert_asset_with(&self.pool, asset).await
        }

        async fn find_orphan_assets(&self, limit: u32) -> MetadataResult<Vec<AssetRow>> {
            let rows = sqlx::query_as::<_, AssetRow>(
                r#"
                SELECT a.* FROM assets a
                WHERE a.organization_id IS NULL
                  AND NOT EXISTS (SELECT 1 FROM builds b WHERE b.asset_id = a.asset_id)
                ORDER BY a.created_at ASC
                LIMIT ?
                "#,
            )
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn is_orphan_asset(&self, asset_id: &str) -> MetadataResult<bool> {
            let orphan: bool = sqlx::query_scalar(
                r#"
                SELECT EXISTS(
                    SELECT 1 FROM assets a
                    WHERE a.asset_id = ?
                      AND a.organization_id IS NULL
                      AND NOT EXISTS (SELECT 1 FROM builds b WHERE b.asset_id = a.asset_id)
                )
                "#,
            )
            .bind(asset_id)
            .fetch_one(&self.pool)
            .await?;
            Ok(orphan)
        }

        async fn delete_asset_if_orphaned(&self, asset_id: &str) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                DELETE FROM assets
                WHERE asset_id = ?
                  AND organization_id IS NULL
                  AND NOT EXISTS (SELECT 1 FROM builds b WHERE b.asset_id = assets.asset_id)
                "#,
            )
            .bind(asset_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn hold_asset(
            &self,
            asset_id: &str,
            organization_id: &str,
            project_id: Option<&str>,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE assets SET organization_id = ?, project_id = ?, updated_at = ? WHERE asset_id = ?",
            )
            .bind(organization_id)
            .bind(project_id)
            .bind(OffsetDateTime::now_utc())
            .bind(asset_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("asset {asset_id}")));
            }
            Ok(())
        }

        async fn release_asset(&self, asset_id: &str) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE assets SET organization_id = NULL, project_id = NULL, updated_at = ? WHERE asset_id = ?",
            )
            .bind(OffsetDateTime::now_utc())
            .bind(asset_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("asset {asset_id}")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl BuildRepo for SqliteStore {
        async fn next_build_id(
            &self,
            organization_id: &str,
            project_id: &str,
        ) -> MetadataResult<i64> {
            let next: Option<i64> = sqlx::query_scalar(
                r#"
                SELECT MAX(
                    p.last_build_id,
                    COALESCE(
                        (SELECT MAX(b.build_id) FROM builds b
                         WHERE b.organization_id = p.organization_id
                           AND b.project_id = p.project_id),
                        0
                    )
                ) + 1
                FROM projects p
                WHERE p.organization_id = ? AND p.project_id = ?
                "#,
            )
            .bind(organization_id)
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;

            next.ok_or_else(|| {
                MetadataError::NotFound(format!("project '{organization_id}/{project_id}'"))
            })
        }

        async fn get_build(
            &self,
            organization_id: &str,
            project_id: &str,
            build_id: i64,
        ) -> MetadataResult<Option<BuildRow>> {
            let row = sqlx::query_as::<_, BuildRow>(
                "SELECT * FROM builds WHERE organization_id = ? AND project_id = ? AND build_id = ?",
            )
            .bind(organization_id)
            .bind(project_id)
            .bind(build_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn build_exists(
            &self,
            organization_id: &str,
            project_id: &str,
            build_id: i64,
        ) -> MetadataResult<bool> {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM builds WHERE organization_id = ? AND project_id = ? AND build_id = ?)",
            )
            .bind(organization_id)
            .bind(project_id)
            .bind(build_id)
            .fetch_one(&self.pool)
            .await?;
            Ok(exists)
        }

        async fn create_build_with_asset(
            &self,
            asset: &NewAsset,
            build: &NewBuild,
        ) -> MetadataResult<BuildRow> {
            let mut tx = self.pool.begin().await?;

            upsert_asset_with(&mut *tx, asset).await?;

            let inserted = sqlx::query(
                r#"
                INSERT INTO builds (
                    organization_id, project_id, build_id, asset_id, manifest,
                    changelog, description, keep, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&build.organization_id)
            .bind(&build.project_id)
            .bind(build.build_id)
            .bind(&asset.asset_id)
            .bind(&build.manifest)
            .bind(&build.changelog)
            .bind(&build.description)
            .bind(build.keep)
            .bind(build.created_at)
            .bind(build.created_at)
            .execute(&mut *tx)
            .await;

            // Dropping `tx` on the error paths rolls back the asset upsert.
            if let Err(e) = inserted {
                let err = MetadataError::from(e);
                if err.is_conflict() {
                    return Err(MetadataError::AlreadyExists(format!(
                        "build {} already exists in '{}/{}'",
                        build.build_id, build.organization_id, build.project_id
                    )));
                }
                return Err(err);
            }

            sqlx::query(
                "UPDATE projects SET last_build_id = MAX(last_build_id, ?), updated_at = ? WHERE organization_id = ? AND project_id = ?",
            )
            .bind(build.build_id)
            .bind(build.created_at)
            .bind(&build.organization_id)
            .bind(&build.project_id)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;

            Ok(BuildRow {
                organization_id: build.organization_id.clone(),
                project_id: build.project_id.clone(),
                build_id: build.build_id,
                asset_id: Some(asset.asset_id.clone()),
                manifest: build.manifest.clone(),
                changelog: build.changelog.clone(),
                description: build.description.clone(),
                keep: build.keep,
                created_at: build.created_at,
                updated_at: build.created_at,
            })
        }

        async fn list_builds_with_assets(
            &self,
            organization_id: &str,
            project_id: &str,
        ) -> MetadataResult<Vec<BuildWithAssetRow>> {
            let rows = sqlx::query_as::<_, BuildWithAssetRow>(
                r#"
                SELECT b.build_id, b.asset_id, b.manifest, b.changelog, b.keep, b.created_at,
                       a.filename, a.hashes, a.size_bytes
                FROM builds b
                LEFT JOIN assets a ON a.asset_id = b.asset_id
                WHERE b.organization_id = ? AND b.project_id = ?
                ORDER BY b.build_id DESC
                "#,
            )
            .bind(organization_id)
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_ephemeral_builds(
            &self,
            organization_id: &str,
            project_id: &str,
        ) -> MetadataResult<Vec<BuildRow>> {
            let rows = sqlx::query_as::<_, BuildRow>(
                r#"
                SELECT * FROM builds
                WHERE organization_id = ? AND project_id = ? AND keep = 0
                ORDER BY created_at ASC, build_id ASC
                "#,
            )
            .bind(organization_id)
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn delete_build(
            &self,
            organization_id: &str,
            project_id: &str,
            build_id: i64,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "DELETE FROM builds WHERE organization_id = ? AND project_id = ? AND build_id = ?",
            )
            .bind(organization_id)
            .bind(project_id)
            .bind(build_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS organizations (
    organization_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS projects (
    organization_id TEXT NOT NULL REFERENCES organizations(organization_id) ON DELETE CASCADE,
    project_id TEXT NOT NULL,
    project_key TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    historical INTEGER NOT NULL DEFAULT 100 CHECK (historical >= 0),
    last_build_id INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (organization_id, project_id)
);

-- Tokens: only the keyed hash is stored
CREATE TABLE IF NOT EXISTS tokens (
    token_hash TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    description TEXT,
    expires_at TEXT,
    created_at TEXT NOT NULL,
    last_used_at TEXT,
    FOREIGN KEY (organization_id, project_id)
        REFERENCES projects(organization_id, project_id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_tokens_project ON tokens(organization_id, project_id);

-- Assets: organization_id/project_id form an optional retention hold
CREATE TABLE IF NOT EXISTS assets (
    asset_id TEXT PRIMARY KEY,
    filename TEXT NOT NULL,
    mime_type TEXT NOT NULL DEFAULT 'application/octet-stream',
    hashes TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    organization_id TEXT REFERENCES organizations(organization_id) ON DELETE SET NULL,
    project_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (organization_id, project_id)
        REFERENCES projects(organization_id, project_id) ON DELETE SET NULL
);
CREATE INDEX IF NOT EXISTS idx_assets_unheld ON assets(created_at) WHERE organization_id IS NULL;

-- Builds: asset_id is nullable so dangling builds can be detected
CREATE TABLE IF NOT EXISTS builds (
    organization_id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    build_id INTEGER NOT NULL CHECK (build_id > 0),
    asset_id TEXT REFERENCES assets(asset_id) ON DELETE SET NULL,
    manifest TEXT NOT NULL,
    changelog TEXT,
    description TEXT,
    keep INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (organization_id, project_id, build_id),
    FOREIGN KEY (organization_id, project_id)
        REFERENCES projects(organization_id, project_id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_builds_asset ON builds(asset_id);
CREATE INDEX IF NOT EXISTS idx_builds_retention ON builds(organization_id, project_id, keep, created_at, build_id);
"#;
