//! Core domain types and shared logic for the AppDistrib build server.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Single-pass digest pipeline and the keyed asset address
//! - Storage layout (shard paths, manifest and changelog locations)
//! - Build identifiers and published manifest documents
//! - Streaming upload protocol messages
//! - Project-bound upload tokens
//! - Configuration

pub mod build;
pub mod config;
pub mod error;
pub mod hash;
pub mod layout;
pub mod manifest;
pub mod protocol;
pub mod token;

pub use build::BuildId;
pub use error::{Error, Result};
pub use hash::{AssetHashes, AssetKey, DigestPipeline, Digests, Sha3Digest};
pub use manifest::{BuildManifest, ProjectManifest};
pub use protocol::{BuildFooter, BuildHeader, ClientMessage, ControlFrame, ServerMessage};

/// Maximum chunk size: 32 MiB
pub const MAX_CHUNK_SIZE: u64 = 32 * 1024 * 1024;

/// Default MIME type recorded for uploaded assets.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";
