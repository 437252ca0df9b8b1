//! HTTP request handlers.

pub mod builds;
pub mod health;

pub use builds::*;
pub use health::*;
