//! Project-scoped authentication and request tracing.
//!
//! Callers identify themselves with three headers, each sent exactly once:
//! `Authorization: Bearer <token>`, `X-Organization` and `X-Project`. The
//! token must have been minted for that project.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use appdistrib_core::token::hash_token;
use appdistrib_metadata::models::{OrganizationRow, ProjectRow};
use appdistrib_metadata::repos::{OrganizationRepo, ProjectRepo, TokenRepo};
use time::OffsetDateTime;
use tracing::Instrument;
use uuid::Uuid;

/// Header naming the organization.
pub const ORGANIZATION_HEADER: &str = "x-organization";

/// Header naming the project.
pub const PROJECT_HEADER: &str = "x-project";

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and potential log injection.
const MAX_TRACE_ID_LEN: usize = 128;

const MISSING_METADATA: &str = "missing or incorrect metadata";

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value.
    /// The value is truncated to MAX_TRACE_ID_LEN characters and non-printable characters removed.
    pub fn from_client(value: &str) -> Self {
        // Limit by character count, not byte count, to stay on UTF-8 boundaries.
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    /// Get the trace ID as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The authenticated project of a request.
#[derive(Clone, Debug)]
pub struct ProjectScope {
    pub organization: OrganizationRow,
    pub project: ProjectRow,
}

impl ProjectScope {
    pub fn organization_id(&self) -> &str {
        &self.organization.organization_id
    }

    pub fn project_id(&self) -> &str {
        &self.project.project_id
    }
}

impl<S: Send + Sync> FromRequestParts<S> for ProjectScope {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ProjectScope>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized(MISSING_METADATA.to_string()))
    }
}

/// Value of a header that must appear exactly once.
fn single_header<'a>(headers: &'a HeaderMap, name: &str) -> ApiResult<Option<&'a str>> {
    let mut values = headers.get_all(name).iter();
    let Some(first) = values.next() else {
        return Ok(None);
    };
    if values.next().is_some() {
        return Err(ApiError::Unauthorized(MISSING_METADATA.to_string()));
    }
    first
        .to_str()
        .map(|v| Some(v.trim()))
        .map_err(|_| ApiError::Unauthorized(MISSING_METADATA.to_string()))
}

/// Extract bearer token from Authorization header.
/// Per RFC 6750, the "Bearer" scheme is case-insensitive.
fn extract_bearer_token(headers: &HeaderMap) -> ApiResult<Option<&str>> {
    let Some(value) = single_header(headers, AUTHORIZATION.as_str())? else {
        return Ok(None);
    };
    if value.len() >= 7 && value[..7].eq_ignore_ascii_case("bearer ") {
        Ok(Some(value[7..].trim()))
    } else {
        Err(ApiError::Unauthorized(MISSING_METADATA.to_string()))
    }
}

/// Extract trace ID from X-Trace-Id header or generate a new one.
fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// Resolve the project and check that `token` was minted for it.
pub async fn authorize_project(
    state: &AppState,
    organization_id: &str,
    project_id: &str,
    token: &str,
) -> ApiResult<ProjectScope> {
    let organization = state
        .metadata
        .get_organization(organization_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("organization '{organization_id}'")))?;
    let project = state
        .metadata
        .get_project(organization_id, project_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("project '{organization_id}/{project_id}'"))
        })?;

    let invalid = || ApiError::Unauthorized("invalid token".to_string());
    let token_hash = hash_token(
        &state.config.auth.secret_key,
        &project.project_key,
        token,
    )
    .map_err(|_| invalid())?;

    let token_row = state
        .metadata
        .get_token_by_hash(&token_hash)
        .await?
        .ok_or_else(invalid)?;
    if token_row.organization_id != organization_id || token_row.project_id != project_id {
        return Err(invalid());
    }
    if token_row.is_expired(OffsetDateTime::now_utc()) {
        return Err(ApiError::Unauthorized("token expired".to_string()));
    }

    // Update last used time (fire and forget)
    let metadata = state.metadata.clone();
    tokio::spawn(async move {
        let _ = metadata
            .touch_token(&token_hash, OffsetDateTime::now_utc())
            .await;
    });

    Ok(ProjectScope {
        organization,
        project,
    })
}

/// Authentication middleware that validates project credentials and sets up
/// trace context.
///
/// Requests without any credentials pass through unauthenticated; handlers
/// that need a project extract [`ProjectScope`], which rejects them.
/// Partial or malformed credentials are rejected here.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let trace_id = extract_or_generate_trace_id(&req);
    let trace_id_str = trace_id.0.clone();
    req.extensions_mut().insert(trace_id);

    let span = tracing::info_span!("request", trace_id = %trace_id_str);

    let headers = req.headers();
    let credentials = (
        extract_bearer_token(headers)?.map(str::to_owned),
        single_header(headers, ORGANIZATION_HEADER)?.map(str::to_owned),
        single_header(headers, PROJECT_HEADER)?.map(str::to_owned),
    );

    match credentials {
        (None, None, None) => {}
        (Some(token), Some(organization), Some(project))
            if !token.is_empty() && !organization.is_empty() && !project.is_empty() =>
        {
            let scope = authorize_project(&state, &organization, &project, &token)
                .instrument(span.clone())
                .await?;
            req.extensions_mut().insert(scope);
        }
        _ => return Err(ApiError::Unauthorized(MISSING_METADATA.to_string())),
    }

    let response = next.run(req).instrument(span).await;
    Ok(response)
}

/// Get the trace ID from request extensions.
pub fn get_trace_id(req: &Request) -> Option<&TraceId> {
    req.extensions().get::<TraceId>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn trace_id_is_sanitized() {
        let id = TraceId::from_client("abc\ndef\u{7f}");
        assert_eq!(id.as_str(), "abcdef");
        let long = "x".repeat(500);
        assert_eq!(TraceId::from_client(&long).as_str().len(), MAX_TRACE_ID_LEN);
        assert!(!TraceId::from_client("\n").as_str().is_empty());
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("BEARER tk1_abc"));
        assert_eq!(extract_bearer_token(&headers).unwrap(), Some("tk1_abc"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic Zm9v"));
        assert!(extract_bearer_token(&headers).is_err());
    }

    #[test]
    fn duplicate_headers_are_rejected() {
        let mut headers = HeaderMap::new();
        headers.append(ORGANIZATION_HEADER, HeaderValue::from_static("acme"));
        assert_eq!(single_header(&headers, ORGANIZATION_HEADER).unwrap(), Some("acme"));

        headers.append(ORGANIZATION_HEADER, HeaderValue::from_static("other"));
        assert!(single_header(&headers, ORGANIZATION_HEADER).is_err());
        assert_eq!(single_header(&headers, PROJECT_HEADER).unwrap(), None);
    }
}
