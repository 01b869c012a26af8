//! Trigger channel contract.
//!
//! A channel consumes one kind of decoded sample and emits a
//! [`TriggerSignal`] per tick. Channels never fuse, debounce, or talk to
//! each other; that is the job of [`crate::fusion::EventFusion`].

use reelcast_common::config::RollConfig;
use reelcast_job_model::{ChannelId, TriggerSignal};

use crate::sample::{AudioSample, FrameSample};

/// Common channel identity and timing.
pub trait TriggerChannel: Send {
    fn id(&self) -> ChannelId;

    /// Nominal time between signals, used by the health monitor.
    fn expected_period_secs(&self) -> f64;

    /// Pre/post roll applied to events this channel triggers.
    fn roll(&self) -> RollConfig;
}

/// Channel driven by video frames.
pub trait FrameChannel: TriggerChannel {
    /// Process one frame. Returns `None` when the channel skips this frame
    /// (e.g. rate-limited analysis).
    fn on_frame(&mut self, frame: &FrameSample) -> Option<TriggerSignal>;

    /// Forget frame history, e.g. after frames were dropped or the source
    /// restarted.
    fn reset(&mut self);
}

/// Channel driven by audio buffers.
pub trait AudioChannel: TriggerChannel {
    fn on_audio(&mut self, sample: &AudioSample) -> TriggerSignal;

    fn reset(&mut self);
}
