//! Reelcast Common Utilities
//!
//! Shared infrastructure for all Reelcast crates:
//! - Error types and result aliases
//! - Stream clock and channel cadence utilities
//! - Tracing/logging initialization
//! - Configuration loading
//! - Process liveness checks used by crash recovery

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod process;

pub use clock::*;
pub use config::*;
pub use error::*;
