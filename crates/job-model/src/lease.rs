//! Registry records for hardware leases and live sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stream::Orientation;

/// What a hardware lease is being used for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LeasePurpose {
    /// Branding render of a queued job.
    Render { job_id: String },
    /// Vertical re-encode during clip extraction.
    Reframe { clip: String },
}

/// Persisted record of one exclusive hardware claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub lease_id: String,

    /// Physical encoder/decoder slot index.
    pub slot: u32,

    pub purpose: LeasePurpose,

    /// Process that holds the hardware context.
    pub owner_pid: u32,

    /// Per-process token distinguishing a live owner from a reused pid.
    #[serde(default)]
    pub owner_token: String,

    /// Logical session (worker or stream) inside the owning process.
    pub session_id: String,

    pub acquired_at: DateTime<Utc>,
}

/// Persisted record of a running detection session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub stream_id: String,
    pub uri: String,
    pub orientation: Orientation,
    pub owner_pid: u32,
    #[serde(default)]
    pub owner_token: String,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_purpose_is_tagged() {
        let purpose = LeasePurpose::Render {
            job_id: "abc".to_string(),
        };
        let json = serde_json::to_value(&purpose).unwrap();
        assert_eq!(json["type"], "render");
        assert_eq!(json["job_id"], "abc");
    }
}
