//! Audio-Sustain channel: crowd roar detection.
//!
//! Fires when normalized energy stays at or above the threshold for a full
//! contiguous `sustain_secs`. A single buffer below the threshold resets the
//! run, and the run also restarts after a fire, so a continuous roar fires
//! once per sustain period and fusion debounces the repeats. A gap in
//! buffer timestamps (dropped buffers) breaks the run like a quiet buffer.

use std::collections::VecDeque;

use reelcast_common::config::{AudioSustainConfig, RollConfig};
use reelcast_job_model::{ChannelId, TriggerSignal};

use crate::channel::{AudioChannel, TriggerChannel};
use crate::sample::AudioSample;

/// Float slack when comparing accumulated buffer durations.
const DURATION_EPSILON: f64 = 1e-6;

/// Rolling history kept for confidence and diagnostics.
const HISTORY_SECS: f64 = 1.0;

pub struct AudioSustainChannel {
    config: AudioSustainConfig,
    buffer_secs: f64,
    /// Length of the current above-threshold run.
    run_secs: f64,
    /// Energies of the current run.
    run_energy_sum: f64,
    run_len: usize,
    history: VecDeque<AudioSample>,
    /// Where the next buffer should start if none were dropped.
    next_pts: Option<f64>,
}

impl AudioSustainChannel {
    /// `buffer_secs` is the nominal length of each incoming buffer.
    pub fn new(config: AudioSustainConfig, buffer_secs: f64) -> Self {
        Self {
            config,
            buffer_secs,
            run_secs: 0.0,
            run_energy_sum: 0.0,
            run_len: 0,
            history: VecDeque::new(),
            next_pts: None,
        }
    }

    /// Current above-threshold run length.
    pub fn run_secs(&self) -> f64 {
        self.run_secs
    }

    /// Mean energy over the rolling history window.
    pub fn recent_energy(&self) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }
        self.history.iter().map(|s| s.energy).sum::<f64>() / self.history.len() as f64
    }

    fn push_history(&mut self, sample: &AudioSample) {
        self.history.push_back(*sample);
        while let Some(front) = self.history.front() {
            if sample.pts - front.pts > HISTORY_SECS {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }

    fn clear_run(&mut self) {
        self.run_secs = 0.0;
        self.run_energy_sum = 0.0;
        self.run_len = 0;
    }
}

impl TriggerChannel for AudioSustainChannel {
    fn id(&self) -> ChannelId {
        ChannelId::AudioSustain
    }

    fn expected_period_secs(&self) -> f64 {
        self.buffer_secs
    }

    fn roll(&self) -> RollConfig {
        self.config.roll
    }
}

impl AudioChannel for AudioSustainChannel {
    fn on_audio(&mut self, sample: &AudioSample) -> TriggerSignal {
        if let Some(expected) = self.next_pts {
            let slack = self.buffer_secs.max(sample.duration_secs) / 2.0;
            if (sample.pts - expected).abs() > slack {
                tracing::debug!(expected, pts = sample.pts, "Audio gap, restarting run");
                self.clear_run();
            }
        }
        self.next_pts = Some(sample.pts + sample.duration_secs);
        self.push_history(sample);

        if sample.energy < self.config.threshold {
            self.clear_run();
            return TriggerSignal::idle(ChannelId::AudioSustain, sample.pts);
        }

        self.run_secs += sample.duration_secs;
        self.run_energy_sum += sample.energy;
        self.run_len += 1;

        if self.run_secs + DURATION_EPSILON < self.config.sustain_secs {
            return TriggerSignal::idle(ChannelId::AudioSustain, sample.pts);
        }

        let mean = self.run_energy_sum / self.run_len as f64;
        let run = self.run_secs;
        self.clear_run();
        tracing::debug!(pts = sample.pts, energy = mean, run_secs = run, "Audio sustain fired");
        TriggerSignal::fire(
            ChannelId::AudioSustain,
            sample.pts,
            mean,
            format!("energy {mean:.2} for {run:.1}s"),
        )
    }

    fn reset(&mut self) {
        self.clear_run();
        self.history.clear();
        self.next_pts = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn channel() -> AudioSustainChannel {
        AudioSustainChannel::new(AudioSustainConfig::default(), 0.1)
    }

    fn feed(channel: &mut AudioSustainChannel, energies: &[f64]) -> Vec<bool> {
        energies
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let sample = AudioSample {
                    pts: i as f64 * 0.1,
                    duration_secs: 0.1,
                    energy: *e,
                };
                channel.on_audio(&sample).fired
            })
            .collect()
    }

    #[test]
    fn test_fires_after_contiguous_sustain() {
        let mut ch = channel();
        let fired = feed(&mut ch, &[0.7, 0.7, 0.7]);
        assert_eq!(fired, vec![false, false, true]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let mut ch = channel();
        let fired = feed(&mut ch, &[0.65, 0.65, 0.65]);
        assert_eq!(fired, vec![false, false, true]);
    }

    #[test]
    fn test_interruption_restarts_run() {
        let mut ch = channel();
        let fired = feed(&mut ch, &[0.9, 0.9, 0.2, 0.9, 0.9, 0.9]);
        assert_eq!(fired, vec![false, false, false, false, false, true]);
    }

    #[test]
    fn test_continuous_roar_fires_once_per_sustain() {
        let mut ch = channel();
        let fired = feed(&mut ch, &[0.8; 7]);
        assert_eq!(fired, vec![false, false, true, false, false, true, false]);
    }

    #[test]
    fn test_gap_in_timestamps_restarts_run() {
        let mut ch = channel();
        let fired: Vec<bool> = [0.0, 0.1, 5.0, 5.1, 5.2]
            .iter()
            .map(|pts| {
                ch.on_audio(&AudioSample {
                    pts: *pts,
                    duration_secs: 0.1,
                    energy: 0.9,
                })
                .fired
            })
            .collect();
        assert_eq!(fired, vec![false, false, false, false, true]);
    }

    #[test]
    fn test_jitter_within_half_buffer_is_contiguous() {
        let mut ch = channel();
        let fired: Vec<bool> = [0.0, 0.12, 0.19]
            .iter()
            .map(|pts| {
                ch.on_audio(&AudioSample {
                    pts: *pts,
                    duration_secs: 0.1,
                    energy: 0.9,
                })
                .fired
            })
            .collect();
        assert_eq!(fired, vec![false, false, true]);
    }

    #[test]
    fn test_reset_clears_run() {
        let mut ch = channel();
        feed(&mut ch, &[0.9, 0.9]);
        ch.reset();
        assert_eq!(ch.run_secs(), 0.0);
        assert_eq!(ch.recent_energy(), 0.0);
    }

    proptest! {
        /// Fires exactly when the last `k` buffers since the previous fire
        /// were all at or above threshold.
        #[test]
        fn fires_only_on_strict_contiguous_runs(
            energies in proptest::collection::vec(0.0f64..1.0, 0..200)
        ) {
            let mut ch = channel();
            let fired = feed(&mut ch, &energies);
            let needed = 3usize;
            let mut run = 0usize;
            for (i, e) in energies.iter().enumerate() {
                if *e >= 0.65 {
                    run += 1;
                } else {
                    run = 0;
                }
                let expect = run >= needed;
                if expect {
                    run = 0;
                }
                prop_assert_eq!(fired[i], expect, "index {}", i);
            }
        }
    }
}
