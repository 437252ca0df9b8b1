//! HTTP and WebSocket server for AppDistrib build ingestion.
//!
//! This crate provides:
//! - The streaming upload protocol (per-stream state machine + WebSocket)
//! - Build registration with write-time retention
//! - Manifest and changelog publishing
//! - Background orphan and empty directory sweeps
//! - Unary next-id and regenerate endpoints
//! - Bootstrap of configured projects and operator commands

pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod gc;
pub mod handlers;
pub mod ingest;
pub mod metrics;
pub mod publisher;
pub mod registrar;
pub mod routes;
pub mod state;

pub use auth::{ProjectScope, TraceId};
pub use error::{ApiError, ApiResult};
pub use ingest::{Inbound, IngestSession, run_ingest};
pub use publisher::ManifestPublisher;
pub use routes::create_router;
pub use state::AppState;
