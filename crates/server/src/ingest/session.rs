//! Per-stream upload state machine.
//!
//! `Init -> HeaderReceived -> Streaming -> FooterReceived -> Finalizing ->
//! Completed | Failed`. The session is advanced one message at a time and
//! owns the digest pipeline and the staging file, so dropping it at any
//! point discards everything the upload wrote.

use crate::auth::ProjectScope;
use crate::error::{ApiError, ApiResult};
use crate::publisher::ManifestPublisher;
use crate::registrar::{self, BuildRegistration};
use crate::state::AppState;
use appdistrib_core::hash::{DigestPipeline, Sha3Digest};
use appdistrib_core::layout::validate_filename;
use appdistrib_core::manifest::parse_manifest_blob;
use appdistrib_core::{BuildFooter, BuildHeader, BuildId, ClientMessage, ServerMessage};
use appdistrib_metadata::repos::BuildRepo;
use appdistrib_storage::{PromoteOutcome, StagingFile};
use bytes::Bytes;

/// Phase of an upload stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Init,
    HeaderReceived,
    Streaming,
    FooterReceived,
    Finalizing,
    Completed,
    Failed,
}

impl SessionPhase {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Header fields retained until finalization.
struct Accepted {
    build_id: BuildId,
    file_size: u64,
    keep: bool,
    filename: String,
    manifest: String,
    changelog: Option<String>,
    description: Option<String>,
}

/// One upload stream.
pub struct IngestSession {
    state: AppState,
    scope: ProjectScope,
    phase: SessionPhase,
    accepted: Option<Accepted>,
    pipeline: Option<DigestPipeline>,
    staging: Option<StagingFile>,
    received: u64,
    claimed: Option<Sha3Digest>,
}

impl IngestSession {
    pub fn new(state: AppState, scope: ProjectScope) -> Self {
        Self {
            state,
            scope,
            phase: SessionPhase::Init,
            accepted: None,
            pipeline: None,
            staging: None,
            received: 0,
            claimed: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn scope(&self) -> &ProjectScope {
        &self.scope
    }

    /// Build id accepted by the header, if any.
    pub fn build_id(&self) -> Option<BuildId> {
        self.accepted.as_ref().map(|a| a.build_id)
    }

    /// Advance by one client message, returning the reply to send, if any.
    /// Any error leaves the session `Failed` with its staging file removed.
    pub async fn handle(&mut self, message: ClientMessage) -> ApiResult<Option<ServerMessage>> {
        let result = match message {
            ClientMessage::Header(header) => self.on_header(header).await.map(Some),
            ClientMessage::Chunk(chunk) => self.on_chunk(chunk).await.map(Some),
            ClientMessage::Footer(footer) => self.on_footer(footer).map(|()| None),
        };
        if result.is_err() {
            self.fail().await;
        }
        result
    }

    /// Verify and commit the upload at end of stream. Returns the `key`
    /// reply.
    pub async fn finish(&mut self) -> ApiResult<ServerMessage> {
        let result = self.finalize().await;
        match result {
            Ok(_) => self.phase = SessionPhase::Completed,
            Err(_) => self.fail().await,
        }
        result
    }

    /// Abandon the upload, removing the staging file.
    pub async fn abort(&mut self) {
        if self.phase != SessionPhase::Completed {
            self.fail().await;
        }
    }

    async fn fail(&mut self) {
        if self.phase == SessionPhase::Completed {
            return;
        }
        self.phase = SessionPhase::Failed;
        self.pipeline = None;
        if let Some(staging) = self.staging.take() {
            if let Err(e) = staging.abort().await {
                tracing::warn!(error = %e, "Failed to remove staging file");
            }
        }
    }

    fn finished_error(&self) -> ApiError {
        ApiError::ProtocolViolation("stream already finished".to_string())
    }

    async fn on_header(&mut self, header: BuildHeader) -> ApiResult<ServerMessage> {
        match self.phase {
            SessionPhase::Init => {}
            phase if phase.is_terminal() => return Err(self.finished_error()),
            _ => {
                return Err(ApiError::ProtocolViolation(
                    "header already received".to_string(),
                ));
            }
        }

        validate_filename(&header.filename)
            .map_err(|e| ApiError::ProtocolViolation(e.to_string()))?;
        let manifest = match header.manifest.as_deref() {
            Some(text) => parse_manifest_blob(text)
                .map_err(|e| ApiError::ProtocolViolation(e.to_string()))?
                .get()
                .to_string(),
            None => "null".to_string(),
        };

        let org_id = self.scope.organization_id();
        let project_id = self.scope.project_id();
        let build_id = match header.build_id {
            Some(id) => {
                if self
                    .state
                    .metadata
                    .build_exists(org_id, project_id, id.as_i64())
                    .await?
                {
                    return Err(ApiError::Conflict(format!("build {id} already exists")));
                }
                id
            }
            None => registrar::next_build_id(&self.state, &self.scope).await?,
        };

        self.pipeline = Some(DigestPipeline::new(self.state.storage_secret())?);
        self.staging = Some(self.state.storage.stage().await?);
        self.accepted = Some(Accepted {
            build_id,
            file_size: header.file_size,
            keep: header.keep,
            filename: header.filename,
            manifest,
            changelog: header.changelog,
            description: header.description,
        });
        self.phase = SessionPhase::HeaderReceived;

        tracing::debug!(
            build_id = %build_id,
            file_size = header.file_size,
            "Upload header accepted"
        );
        Ok(ServerMessage::BuildId { id: build_id })
    }

    async fn on_chunk(&mut self, chunk: Bytes) -> ApiResult<ServerMessage> {
        match self.phase {
            SessionPhase::HeaderReceived | SessionPhase::Streaming => {}
            SessionPhase::Init => {
                return Err(ApiError::ProtocolViolation(
                    "chunk received before header".to_string(),
                ));
            }
            SessionPhase::FooterReceived => {
                return Err(ApiError::ProtocolViolation(
                    "chunk received after footer".to_string(),
                ));
            }
            _ => return Err(self.finished_error()),
        }

        if chunk.is_empty() {
            return Err(ApiError::ProtocolViolation("empty chunk".to_string()));
        }
        let max_chunk_size = self.state.config.server.max_chunk_size;
        if chunk.len() as u64 > max_chunk_size {
            return Err(ApiError::ProtocolViolation(format!(
                "chunk of {} bytes exceeds the {max_chunk_size} byte limit",
                chunk.len()
            )));
        }

        let (Some(accepted), Some(pipeline), Some(staging)) = (
            self.accepted.as_ref(),
            self.pipeline.as_mut(),
            self.staging.as_mut(),
        ) else {
            return Err(ApiError::Internal("upload not armed".to_string()));
        };

        let observed = self.received + chunk.len() as u64;
        if observed > accepted.file_size {
            return Err(ApiError::SizeMismatch {
                declared: accepted.file_size,
                observed,
            });
        }

        pipeline.update(&chunk);
        staging.write(&chunk).await?;
        self.received = observed;
        self.phase = SessionPhase::Streaming;
        crate::metrics::BYTES_INGESTED.inc_by(chunk.len() as u64);

        Ok(ServerMessage::ChunkAck)
    }

    fn on_footer(&mut self, footer: BuildFooter) -> ApiResult<()> {
        let violation = |msg: &str| Err(ApiError::ProtocolViolation(msg.to_string()));
        match self.phase {
            SessionPhase::Streaming => {}
            SessionPhase::Init => return violation("footer received before header"),
            SessionPhase::HeaderReceived => return violation("footer received before any chunk"),
            SessionPhase::FooterReceived => return violation("footer already received"),
            _ => return Err(self.finished_error()),
        }

        let claimed = Sha3Digest::from_hex(footer.hash.trim())
            .map_err(|e| ApiError::ProtocolViolation(format!("invalid footer hash: {e}")))?;
        self.claimed = Some(claimed);
        self.phase = SessionPhase::FooterReceived;
        Ok(())
    }

    async fn finalize(&mut self) -> ApiResult<ServerMessage> {
        if self.phase != SessionPhase::FooterReceived {
            if self.phase.is_terminal() {
                return Err(self.finished_error());
            }
            return Err(ApiError::ProtocolViolation(
                "header, chunk, or footer not received".to_string(),
            ));
        }
        self.phase = SessionPhase::Finalizing;

        let (Some(accepted), Some(pipeline), Some(staging), Some(claimed)) = (
            self.accepted.take(),
            self.pipeline.take(),
            self.staging.take(),
            self.claimed.take(),
        ) else {
            return Err(ApiError::Internal("upload not armed".to_string()));
        };

        // `staging` is dropped, and its file removed, on every early return.
        let digests = pipeline.finalize();
        if digests.size != accepted.file_size {
            return Err(ApiError::SizeMismatch {
                declared: accepted.file_size,
                observed: digests.size,
            });
        }
        if digests.sha3 != claimed {
            return Err(ApiError::HashMismatch {
                expected: claimed.to_hex(),
                actual: digests.sha3.to_hex(),
            });
        }

        let staged = staging.finish().await?;
        let build_id = accepted.build_id;

        // Held until the documents are written, so a concurrent upload's
        // retention cannot prune this build between register and publish.
        let _project = self
            .state
            .lock_project(self.scope.organization_id(), self.scope.project_id())
            .await;

        let registered = {
            let _gate = self.state.asset_gate.read().await;
            let outcome = self
                .state
                .storage
                .promote(staged, &accepted.filename, &digests.key)
                .await?;
            if outcome == PromoteOutcome::Deduplicated {
                crate::metrics::ASSETS_DEDUPLICATED.inc();
            }

            registrar::create_build(
                &self.state,
                &self.scope,
                BuildRegistration {
                    build_id,
                    key: digests.key,
                    filename: accepted.filename,
                    hashes: digests.hashes,
                    size: digests.size,
                    manifest: accepted.manifest,
                    changelog: accepted.changelog,
                    description: accepted.description,
                    keep: accepted.keep,
                },
            )
            .await?
        };

        // The build is committed; documents can be rebuilt with a regenerate.
        let publisher = ManifestPublisher::new(&self.state);
        let org_id = self.scope.organization_id();
        let project_id = self.scope.project_id();
        if registered.survived() {
            if let Err(e) = publisher
                .publish_build(org_id, project_id, &registered.build)
                .await
            {
                tracing::warn!(build_id = %build_id, error = %e, "Failed to publish build manifest");
            }
        }
        if let Err(e) = publisher
            .publish_project(&self.scope.organization, &self.scope.project)
            .await
        {
            tracing::warn!(build_id = %build_id, error = %e, "Failed to publish project manifest");
        }

        tracing::info!(
            build_id = %build_id,
            asset = %digests.key,
            size = digests.size,
            "Upload committed"
        );
        Ok(ServerMessage::Key {
            key: digests.key.to_base64(),
        })
    }
}
