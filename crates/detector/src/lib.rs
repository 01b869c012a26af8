//! Reelcast Detector
//!
//! Turns decoded frames and audio buffers into debounced highlight events:
//! - **Text-Cue:** recognize scorebar text and match configured keywords
//! - **Audio-Sustain:** strict contiguous loudness above a threshold
//! - **Motion-Spike:** frame-difference spikes between consecutive frames
//! - **Fusion:** one `ClipRequest` per event, with a cooldown across channels
//! - **Health:** stalled-channel detection from per-channel liveness
//!
//! Channels own no shared state; each keeps only derived values plus the
//! bounded history its rule needs. Apart from the text recognizer boundary,
//! this crate is pure computation.

pub mod audio_sustain;
pub mod channel;
pub mod fusion;
pub mod health;
pub mod motion_spike;
pub mod recognizer;
pub mod sample;
pub mod text_cue;

pub use audio_sustain::AudioSustainChannel;
pub use channel::{AudioChannel, FrameChannel, TriggerChannel};
pub use fusion::{EventFusion, FusionState};
pub use health::{ChannelHealth, HealthEvent, SessionHealth};
pub use motion_spike::MotionSpikeChannel;
pub use sample::{AudioSample, FrameSample, GrayImage};
pub use text_cue::TextCueChannel;
