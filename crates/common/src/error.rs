//! Error types shared across Reelcast crates.

use std::path::PathBuf;

/// Top-level error type for Reelcast operations.
#[derive(Debug, thiserror::Error)]
pub enum ReelError {
    #[error("Ingest error: {message}")]
    Ingest { message: String },

    #[error("Detection error: {message}")]
    Detection { message: String },

    #[error("Extraction error: {message}")]
    Extraction { message: String },

    #[error("Queue error: {message}")]
    Queue { message: String },

    #[error("Registry error: {message}")]
    Registry { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("No free hardware slot (all {slots} slots leased)")]
    LeaseUnavailable { slots: u32 },

    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("Corrupt record at {path}: {message}")]
    CorruptRecord { path: PathBuf, message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using ReelError.
pub type ReelResult<T> = Result<T, ReelError>;

impl ReelError {
    pub fn ingest(msg: impl Into<String>) -> Self {
        Self::Ingest {
            message: msg.into(),
        }
    }

    pub fn detection(msg: impl Into<String>) -> Self {
        Self::Detection {
            message: msg.into(),
        }
    }

    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction {
            message: msg.into(),
        }
    }

    pub fn queue(msg: impl Into<String>) -> Self {
        Self::Queue {
            message: msg.into(),
        }
    }

    pub fn registry(msg: impl Into<String>) -> Self {
        Self::Registry {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Whether this error came from a cooperative shutdown rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether the work never started and can simply be tried again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Cancelled | Self::LeaseUnavailable { .. })
    }
}
