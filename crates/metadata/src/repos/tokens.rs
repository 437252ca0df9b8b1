//! Token repository.

use crate::error::MetadataResult;
use crate::models::TokenRow;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for token operations.
#[async_trait]
pub trait TokenRepo: Send + Sync {
    /// Create a token.
    async fn create_token(&self, token: &TokenRow) -> MetadataResult<()>;

    /// Get a token by hash.
    async fn get_token_by_hash(&self, token_hash: &str) -> MetadataResult<Option<TokenRow>>;

    /// Update last used time.
    async fn touch_token(&self, token_hash: &str, used_at: OffsetDateTime) -> MetadataResult<()>;

    /// Delete a token.
    async fn delete_token(&self, token_hash: &str) -> MetadataResult<bool>;

    /// List tokens for a project.
    async fn list_tokens(
        &self,
        organization_id: &str,
        project_id: &str,
    ) -> MetadataResult<Vec<TokenRow>>;
}
