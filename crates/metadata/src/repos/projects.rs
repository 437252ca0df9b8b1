//! Project repository.

use crate::error::MetadataResult;
use crate::models::ProjectRow;
use async_trait::async_trait;

/// Repository for projects.
#[async_trait]
pub trait ProjectRepo: Send + Sync {
    /// Create a project.
    async fn create_project(&self, project: &ProjectRow) -> MetadataResult<()>;

    /// Get a project by its composite ID.
    async fn get_project(
        &self,
        organization_id: &str,
        project_id: &str,
    ) -> MetadataResult<Option<ProjectRow>>;

    /// Change the number of retained ephemeral builds.
    async fn set_project_historical(
        &self,
        organization_id: &str,
        project_id: &str,
        historical: i64,
    ) -> MetadataResult<()>;
}
