//! WebSocket transport for build uploads.
//!
//! Header, footer and end-of-stream travel as JSON text frames
//! (`{"type": "header", ...}`), chunks as binary frames. Replies are JSON
//! text frames.

use super::{Inbound, IngestSession, run_ingest};
use crate::auth::ProjectScope;
use crate::state::AppState;
use appdistrib_core::{ClientMessage, ControlFrame, ServerMessage};
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt, future};

/// Room for a control frame on top of the largest accepted chunk.
const FRAME_HEADROOM: u64 = 64 * 1024;

/// GET /v1/builds/upload
///
/// Upgrade an authenticated request to an upload stream.
pub async fn upload_build(
    State(state): State<AppState>,
    scope: ProjectScope,
    ws: WebSocketUpgrade,
) -> Response {
    let limit = usize::try_from(state.config.server.max_chunk_size.saturating_add(FRAME_HEADROOM))
        .unwrap_or(usize::MAX);
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_socket(socket, state, scope))
}

async fn handle_socket(socket: WebSocket, state: AppState, scope: ProjectScope) {
    let (sink, stream) = socket.split();

    let inbound = stream
        .filter_map(|frame| future::ready(decode_frame(frame)))
        .boxed();
    let mut outbound = sink.with(|message: ServerMessage| {
        future::ready(
            message
                .to_json()
                .map(|json| Message::Text(json.into()))
                .map_err(axum::Error::new),
        )
    });

    let session = IngestSession::new(state, scope);
    let _ = run_ingest(session, inbound, &mut outbound).await;
    let _ = outbound.close().await;
}

/// Map a socket frame to an inbound event; `None` for frames the protocol
/// ignores.
fn decode_frame(frame: Result<Message, axum::Error>) -> Option<Inbound> {
    match frame {
        Ok(Message::Text(text)) => Some(match ControlFrame::from_json(text.as_str()) {
            Ok(ControlFrame::Header(header)) => Inbound::Message(ClientMessage::Header(header)),
            Ok(ControlFrame::Footer(footer)) => Inbound::Message(ClientMessage::Footer(footer)),
            Ok(ControlFrame::End) => Inbound::End,
            Err(e) => Inbound::Invalid(format!("malformed control frame: {e}")),
        }),
        Ok(Message::Binary(data)) => Some(Inbound::Message(ClientMessage::Chunk(data))),
        Ok(Message::Ping(_) | Message::Pong(_)) => None,
        Ok(Message::Close(_)) => Some(Inbound::Disconnected),
        Err(e) => {
            tracing::debug!(error = %e, "WebSocket receive failed");
            Some(Inbound::Disconnected)
        }
    }
}
