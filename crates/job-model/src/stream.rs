//! Live stream identity and output orientation.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Output orientation of a stream or clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// 16:9 landscape.
    #[default]
    Standard,
    /// 9:16 portrait ("reel").
    Vertical,
}

impl Orientation {
    /// Suffix that marks a vertical clip file stem (`ball_123_V.mp4`).
    pub const VERTICAL_SUFFIX: &'static str = "_V";

    /// Infer orientation from a clip file name.
    pub fn from_clip_name(path: &Path) -> Self {
        let is_vertical = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|stem| stem.ends_with(Self::VERTICAL_SUFFIX))
            .unwrap_or(false);
        if is_vertical {
            Self::Vertical
        } else {
            Self::Standard
        }
    }

    pub fn is_vertical(self) -> bool {
        self == Self::Vertical
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Vertical => "vertical",
        }
    }
}

/// One live ingestion session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamHandle {
    /// Stable stream identifier (the match name).
    pub stream_id: String,

    /// Normalized source URI.
    pub uri: String,

    /// Orientation of the incoming picture.
    pub orientation: Orientation,

    /// When ingestion started.
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl StreamHandle {
    pub fn new(stream_id: impl Into<String>, uri: impl Into<String>, orientation: Orientation) -> Self {
        Self {
            stream_id: stream_id.into(),
            uri: uri.into(),
            orientation,
            started_at: chrono::Utc::now(),
        }
    }
}
