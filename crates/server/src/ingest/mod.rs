//! Streaming build ingestion.
//!
//! [`run_ingest`] drives an [`IngestSession`] from any stream of decoded
//! client messages and writes replies to any sink, so the protocol can be
//! exercised without a socket. [`websocket`] adapts an axum WebSocket to it.

pub mod session;
pub mod websocket;

pub use session::{IngestSession, SessionPhase};
pub use websocket::upload_build;

use crate::error::{ApiError, ApiResult};
use appdistrib_core::{ClientMessage, ServerMessage};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::time::Instant;
use tracing::Instrument;

/// One decoded inbound event.
#[derive(Debug)]
pub enum Inbound {
    Message(ClientMessage),
    /// The client half-closed: no more messages follow.
    End,
    /// A frame that could not be decoded.
    Invalid(String),
    /// The transport went away.
    Disconnected,
}

/// Run one upload to completion. Returns the base64 storage key.
///
/// Every failure is recorded and, unless the client is gone, reported with an
/// `error` frame before returning. The staging file is removed on every
/// failure path.
pub async fn run_ingest<I, O>(
    mut session: IngestSession,
    mut inbound: I,
    mut outbound: O,
) -> ApiResult<String>
where
    I: Stream<Item = Inbound> + Unpin,
    O: Sink<ServerMessage> + Unpin,
    O::Error: Display,
{
    let span = tracing::info_span!(
        "ingest",
        organization = %session.scope().organization_id(),
        project = %session.scope().project_id(),
    );

    async move {
        crate::metrics::ACTIVE_INGEST_STREAMS.inc();
        let started = Instant::now();
        let result = drive(&mut session, &mut inbound, &mut outbound).await;
        crate::metrics::ACTIVE_INGEST_STREAMS.dec();

        match result {
            Ok(key) => {
                crate::metrics::INGEST_DURATION.observe(started.elapsed().as_secs_f64());
                Ok(key)
            }
            Err(e) => {
                session.abort().await;
                crate::metrics::record_upload_failure(e.code());
                if matches!(e, ApiError::Cancelled) {
                    tracing::info!(build_id = ?session.build_id(), "Upload cancelled by client");
                } else {
                    tracing::warn!(build_id = ?session.build_id(), error = %e, "Upload failed");
                    let frame = ServerMessage::Error {
                        code: e.code().to_string(),
                        message: e.to_string(),
                    };
                    if let Err(send_err) = outbound.send(frame).await {
                        tracing::debug!(error = %send_err, "Failed to deliver error frame");
                    }
                }
                Err(e)
            }
        }
    }
    .instrument(span)
    .await
}

async fn drive<I, O>(session: &mut IngestSession, inbound: &mut I, outbound: &mut O) -> ApiResult<String>
where
    I: Stream<Item = Inbound> + Unpin,
    O: Sink<ServerMessage> + Unpin,
    O::Error: Display,
{
    loop {
        let event = inbound.next().await.unwrap_or(Inbound::Disconnected);
        match event {
            Inbound::Message(message) => {
                if let Some(reply) = session.handle(message).await? {
                    outbound.send(reply).await.map_err(|_| ApiError::Cancelled)?;
                }
            }
            Inbound::Invalid(reason) => return Err(ApiError::ProtocolViolation(reason)),
            Inbound::Disconnected => return Err(ApiError::Cancelled),
            Inbound::End => {
                let reply = session.finish().await?;
                let key = match &reply {
                    ServerMessage::Key { key } => key.clone(),
                    _ => String::new(),
                };
                // Committed: a client that left before reading the key can
                // still find the build in the project manifest.
                if let Err(e) = outbound.send(reply).await {
                    tracing::debug!(error = %e, "Client left before receiving the key");
                }
                return Ok(key);
            }
        }
    }
}
