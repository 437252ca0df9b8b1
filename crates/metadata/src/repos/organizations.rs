//! Organization repository.

use crate::error::MetadataResult;
use crate::models::OrganizationRow;
use async_trait::async_trait;

/// Repository for organizations.
#[async_trait]
pub trait OrganizationRepo: Send + Sync {
    /// Create an organization.
    async fn create_organization(&self, organization: &OrganizationRow) -> MetadataResult<()>;

    /// Get an organization by ID.
    async fn get_organization(
        &self,
        organization_id: &str,
    ) -> MetadataResult<Option<OrganizationRow>>;

    /// Delete an organization and, by cascade, its projects, tokens and builds.
    async fn delete_organization(&self, organization_id: &str) -> MetadataResult<bool>;
}
