//! squarecut Common Utilities
//!
//! Shared infrastructure for all squarecut crates:
//! - Error types and result aliases
//! - Timestamp conversions and the per-invocation clock
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
