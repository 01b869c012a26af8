//! Motion-Spike channel: sudden whole-frame change between consecutive frames.
//!
//! Frames are downsampled before differencing. Only truly consecutive frames
//! are compared: when the frame index jumps (dropped or lagged frames) the
//! channel re-primes on the new frame instead of reporting a bogus spike.

use reelcast_common::config::{MotionSpikeConfig, RollConfig};
use reelcast_job_model::{ChannelId, TriggerSignal};

use crate::channel::{FrameChannel, TriggerChannel};
use crate::sample::{FrameSample, GrayImage};

pub struct MotionSpikeChannel {
    config: MotionSpikeConfig,
    fps: u32,
    previous: Option<(u64, GrayImage)>,
    last_score: Option<f64>,
}

impl MotionSpikeChannel {
    pub fn new(config: MotionSpikeConfig, fps: u32) -> Self {
        Self {
            config,
            fps,
            previous: None,
            last_score: None,
        }
    }

    /// Difference score of the last compared frame pair.
    pub fn last_score(&self) -> Option<f64> {
        self.last_score
    }
}

impl TriggerChannel for MotionSpikeChannel {
    fn id(&self) -> ChannelId {
        ChannelId::MotionSpike
    }

    fn expected_period_secs(&self) -> f64 {
        1.0 / self.fps.max(1) as f64
    }

    fn roll(&self) -> RollConfig {
        self.config.roll
    }
}

impl FrameChannel for MotionSpikeChannel {
    fn on_frame(&mut self, frame: &FrameSample) -> Option<TriggerSignal> {
        let current = frame.image.downsample(self.config.downsample);
        let previous = self.previous.replace((frame.frame_index, current));

        let score = match (&previous, &self.previous) {
            (Some((prev_index, prev)), Some((_, cur))) if prev_index + 1 == frame.frame_index => {
                prev.mean_abs_diff(cur)
            }
            _ => None,
        };
        self.last_score = score;

        let Some(score) = score else {
            return Some(TriggerSignal::idle(ChannelId::MotionSpike, frame.pts));
        };

        if score > self.config.threshold {
            let confidence = (score / (self.config.threshold * 2.0).max(f64::EPSILON)).min(1.0);
            tracing::debug!(pts = frame.pts, score, "Motion spike fired");
            Some(TriggerSignal::fire(
                ChannelId::MotionSpike,
                frame.pts,
                confidence,
                format!("diff {score:.1}"),
            ))
        } else {
            Some(TriggerSignal::idle(ChannelId::MotionSpike, frame.pts))
        }
    }

    fn reset(&mut self) {
        self.previous = None;
        self.last_score = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(index: u64, value: u8) -> FrameSample {
        FrameSample::new(index as f64 / 25.0, index, GrayImage::filled(64, 36, value))
    }

    fn channel() -> MotionSpikeChannel {
        MotionSpikeChannel::new(MotionSpikeConfig::default(), 25)
    }

    #[test]
    fn test_first_frame_never_fires() {
        let mut ch = channel();
        let signal = ch.on_frame(&frame(0, 255)).unwrap();
        assert!(!signal.fired);
        assert_eq!(ch.last_score(), None);
    }

    #[test]
    fn test_spike_fires_above_threshold() {
        let mut ch = channel();
        ch.on_frame(&frame(0, 10));
        let calm = ch.on_frame(&frame(1, 25)).unwrap();
        assert!(!calm.fired);
        let spike = ch.on_frame(&frame(2, 200)).unwrap();
        assert!(spike.fired);
        assert_eq!(ch.last_score(), Some(175.0));
        assert_eq!(spike.confidence, 1.0);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let mut ch = channel();
        ch.on_frame(&frame(0, 0));
        assert!(!ch.on_frame(&frame(1, 20)).unwrap().fired);
    }

    #[test]
    fn test_dropped_frames_do_not_compare() {
        let mut ch = channel();
        ch.on_frame(&frame(0, 0));
        let after_gap = ch.on_frame(&frame(5, 255)).unwrap();
        assert!(!after_gap.fired);
        // Next consecutive frame compares against the re-primed one.
        assert!(!ch.on_frame(&frame(6, 250)).unwrap().fired);
    }

    #[test]
    fn test_expected_period_follows_fps() {
        assert!((channel().expected_period_secs() - 0.04).abs() < 1e-12);
    }
}
