//! Render jobs exchanged over the durable queue boundary.
//!
//! The JSON shape of [`Job`] is the external contract shared with the
//! dashboard/API layer: manual submissions must produce the same record.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clip::{ChannelId, ClipRequest, ClipWindow};
use crate::stream::Orientation;
use crate::ModelError;

/// Where a job came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Produced by the live detector.
    Detected,
    /// Submitted by an operator.
    Manual,
}

/// Lifecycle state. Mirrors the queue directory the record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// Branding choices for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BrandingProfile {
    /// Watermark file name inside the logos directory.
    #[serde(default)]
    pub watermark: Option<String>,

    /// Prepend the intro asset.
    #[serde(default)]
    pub intro: bool,

    /// Append the outro asset.
    #[serde(default)]
    pub outro: bool,
}

/// Detection provenance of a detected job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipOrigin {
    pub stream_id: String,
    pub event_timestamp: f64,
    pub trigger_channel: ChannelId,
    pub window: ClipWindow,
}

/// A unit of render work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub kind: JobKind,
    pub source_clip_path: PathBuf,
    pub orientation: Orientation,
    #[serde(default)]
    pub branding_profile: BrandingProfile,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,

    /// Output grouping (match name). Renders land in `<output>/<group>/`.
    #[serde(default)]
    pub group: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<ClipOrigin>,

    /// Failure diagnostic, set when the job lands in the error store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,

    /// Final render, set when the job is done.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Job for a clip cut by the extractor.
    pub fn detected(
        request: &ClipRequest,
        window: ClipWindow,
        clip_path: impl Into<PathBuf>,
        orientation: Orientation,
        branding: BrandingProfile,
    ) -> Self {
        Self {
            job_id: new_job_id(),
            kind: JobKind::Detected,
            source_clip_path: clip_path.into(),
            orientation,
            branding_profile: branding,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            group: request.stream_id.clone(),
            origin: Some(ClipOrigin {
                stream_id: request.stream_id.clone(),
                event_timestamp: request.event_timestamp,
                trigger_channel: request.trigger_channel,
                window,
            }),
            diagnostic: None,
            output_path: None,
            finished_at: None,
        }
    }

    /// Operator submission. Orientation is inferred from the file name when
    /// not given.
    pub fn manual(
        clip_path: impl Into<PathBuf>,
        group: impl Into<String>,
        orientation: Option<Orientation>,
        branding: BrandingProfile,
    ) -> Self {
        let clip_path = clip_path.into();
        let orientation = orientation.unwrap_or_else(|| Orientation::from_clip_name(&clip_path));
        Self {
            job_id: new_job_id(),
            kind: JobKind::Manual,
            source_clip_path: clip_path,
            orientation,
            branding_profile: branding,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            group: group.into(),
            origin: None,
            diagnostic: None,
            output_path: None,
            finished_at: None,
        }
    }

    /// Whether the extractor had to truncate this clip.
    pub fn is_partial(&self) -> bool {
        self.origin.as_ref().map(|o| o.window.partial).unwrap_or(false)
    }

    /// Stem of the source clip, used to name outputs.
    pub fn clip_stem(&self) -> String {
        self.source_clip_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.job_id)
            .to_string()
    }

    /// Check that the id can be used verbatim as a file name.
    pub fn validate_id(&self) -> Result<(), ModelError> {
        validate_job_id(&self.job_id)
    }
}

/// Fresh unique job id.
pub fn new_job_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Job ids double as queue file names; only `[A-Za-z0-9_-]` is accepted.
pub fn validate_job_id(job_id: &str) -> Result<(), ModelError> {
    let ok = !job_id.is_empty()
        && job_id.len() <= 128
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(ModelError::InvalidJobId {
            job_id: job_id.to_string(),
        })
    }
}

/// Final output file name for a clip: `final_<stem>.mp4`.
pub fn final_output_name(clip: &Path) -> String {
    let stem = clip
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("clip");
    format!("final_{stem}.mp4")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::RetentionWindow;

    #[test]
    fn test_manual_job_infers_orientation() {
        let job = Job::manual("/m/Reel/ball_1_V.mp4", "final", None, BrandingProfile::default());
        assert_eq!(job.orientation, Orientation::Vertical);
        assert_eq!(job.kind, JobKind::Manual);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.validate_id().is_ok());
    }

    #[test]
    fn test_detected_job_carries_origin() {
        let request =
            ClipRequest::new("final", 82.0, 10.0, 5.0, ChannelId::AudioSustain, Orientation::Standard)
                .unwrap();
        let window = ClipWindow::resolve(&request, RetentionWindow::new(80.0, 120.0)).unwrap();
        let job = Job::detected(
            &request,
            window,
            "/m/final/Full Screen/ball_1.mp4",
            Orientation::Standard,
            BrandingProfile::default(),
        );
        assert!(job.is_partial());
        assert_eq!(job.group, "final");
        assert_eq!(job.clip_stem(), "ball_1");
    }

    #[test]
    fn test_job_record_shape() {
        let job = Job::manual("/clips/a.mp4", "m", Some(Orientation::Standard), BrandingProfile {
            watermark: Some("club.png".to_string()),
            intro: true,
            outro: false,
        });
        let value = serde_json::to_value(&job).unwrap();
        for key in ["job_id", "kind", "source_clip_path", "orientation", "status", "created_at"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["kind"], "manual");
        assert_eq!(value["status"], "pending");
        assert!(value.get("diagnostic").is_none());
    }

    #[test]
    fn test_minimal_external_record_parses() {
        let json = r#"{
            "job_id": "dash-42",
            "kind": "manual",
            "source_clip_path": "/clips/x.mp4",
            "orientation": "standard",
            "status": "pending",
            "created_at": "2026-01-01T00:00:00Z"
        }"#;
        let job: Job = serde_json::from_str(json).unwrap();
        assert_eq!(job.branding_profile, BrandingProfile::default());
        assert_eq!(job.group, "");
    }

    #[test]
    fn test_job_id_rejects_path_characters() {
        assert!(validate_job_id("../etc").is_err());
        assert!(validate_job_id("a@b").is_err());
        assert!(validate_job_id("").is_err());
        assert!(validate_job_id("ok_id-1").is_ok());
    }

    #[test]
    fn test_final_output_name() {
        assert_eq!(final_output_name(Path::new("/x/ball_9_V.mp4")), "final_ball_9_V.mp4");
    }
}
