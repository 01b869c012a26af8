//! Trigger signals, clip requests, and extraction windows.

use serde::{Deserialize, Serialize};

use crate::stream::Orientation;
use crate::ModelError;

/// Identifies one trigger channel.
///
/// Declaration order is the fusion tie-break priority: when two channels fire
/// at the same timestamp, the earlier variant wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelId {
    /// Scorebar text recognition.
    TextCue,
    /// Sustained crowd noise.
    AudioSustain,
    /// Frame-difference spike.
    MotionSpike,
}

impl ChannelId {
    pub const ALL: [ChannelId; 3] = [Self::TextCue, Self::AudioSustain, Self::MotionSpike];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TextCue => "text_cue",
            Self::AudioSustain => "audio_sustain",
            Self::MotionSpike => "motion_spike",
        }
    }

    /// Lower value wins ties.
    pub fn priority(self) -> u8 {
        self as u8
    }
}

/// One channel tick. Emitted whether or not the channel fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSignal {
    pub channel_id: ChannelId,

    /// Stream seconds of the sample this signal was derived from.
    pub timestamp: f64,

    pub fired: bool,

    /// Channel-specific confidence in `[0.0, 1.0]`.
    pub confidence: f64,

    /// Short human-readable reason when fired (matched keyword, energy, score).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl TriggerSignal {
    /// A liveness tick that did not fire.
    pub fn idle(channel_id: ChannelId, timestamp: f64) -> Self {
        Self {
            channel_id,
            timestamp,
            fired: false,
            confidence: 0.0,
            detail: None,
        }
    }

    /// A firing tick.
    pub fn fire(channel_id: ChannelId, timestamp: f64, confidence: f64, detail: impl Into<String>) -> Self {
        Self {
            channel_id,
            timestamp,
            fired: true,
            confidence: confidence.clamp(0.0, 1.0),
            detail: Some(detail.into()),
        }
    }
}

/// Request to cut a window of media around a detected event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipRequest {
    pub stream_id: String,
    pub event_timestamp: f64,
    pub pre_roll: f64,
    pub post_roll: f64,
    pub trigger_channel: ChannelId,
    pub orientation: Orientation,
}

impl ClipRequest {
    pub fn new(
        stream_id: impl Into<String>,
        event_timestamp: f64,
        pre_roll: f64,
        post_roll: f64,
        trigger_channel: ChannelId,
        orientation: Orientation,
    ) -> Result<Self, ModelError> {
        if !(pre_roll >= 0.0 && post_roll >= 0.0) {
            return Err(ModelError::InvalidRequest {
                message: format!("pre_roll ({pre_roll}) and post_roll ({post_roll}) must be >= 0"),
            });
        }
        if !event_timestamp.is_finite() {
            return Err(ModelError::InvalidRequest {
                message: "event timestamp is not finite".to_string(),
            });
        }
        Ok(Self {
            stream_id: stream_id.into(),
            event_timestamp,
            pre_roll,
            post_roll,
            trigger_channel,
            orientation,
        })
    }

    /// Requested start (may be before the buffer start).
    pub fn requested_start(&self) -> f64 {
        self.event_timestamp - self.pre_roll
    }

    /// Requested end (may be past the buffer end).
    pub fn requested_end(&self) -> f64 {
        self.event_timestamp + self.post_roll
    }

    pub fn requested_duration(&self) -> f64 {
        self.pre_roll + self.post_roll
    }
}

/// Span of stream time currently addressable in the retained buffer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetentionWindow {
    pub start: f64,
    pub end: f64,
}

impl RetentionWindow {
    pub fn new(start: f64, end: f64) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t <= self.end
    }

    pub fn len_secs(&self) -> f64 {
        self.end - self.start
    }
}

/// Resolved extraction window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipWindow {
    pub start: f64,
    pub end: f64,

    /// True when buffer bounds truncated the requested window.
    pub partial: bool,
}

impl ClipWindow {
    /// Clip the request to the retained buffer.
    ///
    /// Fails only when the event itself is not retained; truncation of the
    /// roll on either side yields `partial = true`.
    pub fn resolve(request: &ClipRequest, buffer: RetentionWindow) -> Result<Self, ModelError> {
        if !buffer.contains(request.event_timestamp) {
            return Err(ModelError::OutsideRetention {
                event_secs: request.event_timestamp,
                start: buffer.start,
                end: buffer.end,
            });
        }
        let wanted_start = request.requested_start();
        let wanted_end = request.requested_end();
        let start = wanted_start.max(buffer.start);
        let end = wanted_end.min(buffer.end);
        Ok(Self {
            start,
            end,
            partial: start > wanted_start || end < wanted_end,
        })
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}
