//! Streaming upload protocol messages.
//!
//! A client sends exactly one header, one or more chunks, one footer and then
//! ends the stream. The server answers the header with the assigned build id,
//! every chunk with an acknowledgment, and the end of stream with the storage
//! key. Over a WebSocket, header/footer/end travel as JSON text frames and
//! chunks as binary frames.

use crate::build::BuildId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Upload header: declares what is about to be streamed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildHeader {
    /// Explicit build id. Assigned by the server when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<BuildId>,
    /// Declared artifact size in bytes.
    pub file_size: u64,
    /// Exempt this build from retention pruning.
    #[serde(default)]
    pub keep: bool,
    /// Display filename of the artifact.
    pub filename: String,
    /// Opaque JSON document describing the build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,
    /// Markdown changelog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changelog: Option<String>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Upload footer: the sender's SHA3-256 of the full content, hex encoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildFooter {
    pub hash: String,
}

/// A message from the uploading client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientMessage {
    Header(BuildHeader),
    Chunk(Bytes),
    Footer(BuildFooter),
}

/// JSON text frame sent by the client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    Header(BuildHeader),
    Footer(BuildFooter),
    /// Half-close: no more messages follow.
    End,
}

impl ControlFrame {
    /// Parse a text frame.
    pub fn from_json(text: &str) -> crate::Result<Self> {
        serde_json::from_str(text).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    /// Encode as a text frame.
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| crate::Error::Serialization(e.to_string()))
    }
}

/// A message from the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The build id this upload will be registered under.
    BuildId { id: crate::build::BuildId },
    /// The previous chunk was consumed; the next one may be sent.
    ChunkAck,
    /// Upload committed. `key` is the base64 storage key.
    Key { key: String },
    /// Upload failed. The stream is closed after this message.
    Error { code: String, message: String },
}

impl ServerMessage {
    /// Encode as a text frame.
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    /// Parse a text frame.
    pub fn from_json(text: &str) -> crate::Result<Self> {
        serde_json::from_str(text).map_err(|e| crate::Error::Serialization(e.to_string()))
    }
}
