//! Unary build operations.

use crate::auth::ProjectScope;
use crate::error::ApiResult;
use crate::publisher::ManifestPublisher;
use crate::registrar;
use crate::state::AppState;
use appdistrib_core::BuildId;
use axum::Json;
use axum::extract::State;
use serde::Serialize;

/// Next build id response.
#[derive(Debug, Serialize)]
pub struct NextIdResponse {
    pub id: BuildId,
}

/// GET /v1/builds/next-id - Peek at the id the next upload without an
/// explicit id would receive. Nothing is reserved.
pub async fn next_build_id(
    State(state): State<AppState>,
    scope: ProjectScope,
) -> ApiResult<Json<NextIdResponse>> {
    let id = registrar::next_build_id(&state, &scope).await?;
    Ok(Json(NextIdResponse { id }))
}

/// Regenerate response.
#[derive(Debug, Serialize)]
pub struct RegenerateResponse {
    /// Builds listed in the rewritten project manifest.
    pub builds: usize,
}

/// POST /v1/manifests/regenerate - Rewrite every manifest and changelog of
/// the project from metadata.
pub async fn regenerate_manifests(
    State(state): State<AppState>,
    scope: ProjectScope,
) -> ApiResult<Json<RegenerateResponse>> {
    let _project = state
        .lock_project(scope.organization_id(), scope.project_id())
        .await;
    let builds = ManifestPublisher::new(&state)
        .regenerate_project(&scope.organization, &scope.project)
        .await?;
    Ok(Json(RegenerateResponse { builds }))
}
