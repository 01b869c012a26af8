//! Event fusion: merge per-channel signals into debounced clip requests.
//!
//! # State machine
//!
//! - **Idle:** the first fired signal emits a [`ClipRequest`] anchored at its
//!   timestamp and arms the cooldown.
//! - **ArmedCooldown:** every fired signal from any channel with a timestamp
//!   before `anchor + cooldown` is suppressed. The state returns to Idle once
//!   a signal at or past the cooldown end is observed.
//!
//! The cooldown runs on stream time, so it is unaffected by processing lag.
//! A fired signal older than the last anchor's cooldown window is suppressed
//! even when it arrives late, which keeps emitted anchors at least one
//! cooldown apart regardless of arrival order.
//!
//! When several channels fire on the same timestamp, [`EventFusion::ingest_batch`]
//! orders them by channel priority so the winner is deterministic.

use std::collections::BTreeMap;

use reelcast_common::config::RollConfig;
use reelcast_job_model::{ChannelId, ClipRequest, Orientation, TriggerSignal};

/// Fusion state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FusionState {
    Idle,
    ArmedCooldown {
        /// Timestamp of the event that armed the cooldown.
        anchor: f64,
        /// Stream time at which fusion returns to Idle.
        until: f64,
        channel: ChannelId,
    },
}

/// Running counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FusionStats {
    pub emitted: u64,
    pub suppressed: u64,
    pub signals: u64,
}

pub struct EventFusion {
    stream_id: String,
    orientation: Orientation,
    cooldown_secs: f64,
    rolls: BTreeMap<ChannelId, RollConfig>,
    state: FusionState,
    last_anchor: Option<f64>,
    stats: FusionStats,
}

impl EventFusion {
    pub fn new(stream_id: impl Into<String>, orientation: Orientation, cooldown_secs: f64) -> Self {
        Self {
            stream_id: stream_id.into(),
            orientation,
            cooldown_secs: cooldown_secs.max(0.0),
            rolls: BTreeMap::new(),
            state: FusionState::Idle,
            last_anchor: None,
            stats: FusionStats::default(),
        }
    }

    /// Set the pre/post roll used for events triggered by `channel`.
    pub fn with_roll(mut self, channel: ChannelId, roll: RollConfig) -> Self {
        self.rolls.insert(channel, roll);
        self
    }

    pub fn state(&self) -> FusionState {
        self.state
    }

    pub fn stats(&self) -> FusionStats {
        self.stats
    }

    fn roll_for(&self, channel: ChannelId) -> RollConfig {
        self.rolls.get(&channel).copied().unwrap_or_default()
    }

    /// Advance stream time without a signal.
    pub fn observe_time(&mut self, now: f64) {
        if let FusionState::ArmedCooldown { until, .. } = self.state {
            if now >= until {
                self.state = FusionState::Idle;
            }
        }
    }

    /// Process one signal. Returns a request when it starts a new event.
    pub fn ingest(&mut self, signal: &TriggerSignal) -> Option<ClipRequest> {
        self.stats.signals += 1;
        self.observe_time(signal.timestamp);
        if !signal.fired {
            return None;
        }

        let within_cooldown = self
            .last_anchor
            .map(|anchor| signal.timestamp < anchor + self.cooldown_secs)
            .unwrap_or(false);
        if within_cooldown || matches!(self.state, FusionState::ArmedCooldown { .. }) {
            self.stats.suppressed += 1;
            tracing::debug!(
                channel = signal.channel_id.as_str(),
                pts = signal.timestamp,
                "Suppressed trigger during cooldown"
            );
            return None;
        }

        let roll = self.roll_for(signal.channel_id);
        let request = match ClipRequest::new(
            self.stream_id.clone(),
            signal.timestamp,
            roll.pre_roll_secs,
            roll.post_roll_secs,
            signal.channel_id,
            self.orientation,
        ) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(channel = signal.channel_id.as_str(), error = %e, "Dropping trigger");
                return None;
            }
        };

        self.last_anchor = Some(signal.timestamp);
        self.state = FusionState::ArmedCooldown {
            anchor: signal.timestamp,
            until: signal.timestamp + self.cooldown_secs,
            channel: signal.channel_id,
        };
        self.stats.emitted += 1;
        tracing::info!(
            stream_id = %self.stream_id,
            channel = signal.channel_id.as_str(),
            pts = signal.timestamp,
            detail = signal.detail.as_deref().unwrap_or(""),
            "Highlight detected"
        );
        Some(request)
    }

    /// Process a batch of signals drained together, ordered by timestamp and
    /// then channel priority.
    pub fn ingest_batch(&mut self, mut signals: Vec<TriggerSignal>) -> Vec<ClipRequest> {
        signals.sort_by(|a, b| {
            a.timestamp
                .total_cmp(&b.timestamp)
                .then(a.channel_id.priority().cmp(&b.channel_id.priority()))
        });
        signals.iter().filter_map(|s| self.ingest(s)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fusion(cooldown: f64) -> EventFusion {
        EventFusion::new("match", Orientation::Standard, cooldown)
            .with_roll(ChannelId::TextCue, RollConfig::new(10.0, 5.0))
            .with_roll(ChannelId::AudioSustain, RollConfig::new(6.0, 12.0))
    }

    fn fire(channel: ChannelId, t: f64) -> TriggerSignal {
        TriggerSignal::fire(channel, t, 0.9, "test")
    }

    #[test]
    fn test_first_fire_emits_request_with_channel_roll() {
        let mut f = fusion(8.0);
        let request = f.ingest(&fire(ChannelId::TextCue, 100.0)).unwrap();
        assert_eq!(request.event_timestamp, 100.0);
        assert_eq!(request.pre_roll, 10.0);
        assert_eq!(request.post_roll, 5.0);
        assert_eq!(request.trigger_channel, ChannelId::TextCue);
        assert!(matches!(f.state(), FusionState::ArmedCooldown { until, .. } if until == 108.0));
    }

    #[test]
    fn test_cross_channel_fire_suppressed_in_cooldown() {
        let mut f = fusion(8.0);
        assert!(f.ingest(&fire(ChannelId::AudioSustain, 50.0)).is_some());
        assert!(f.ingest(&fire(ChannelId::TextCue, 53.0)).is_none());
        assert!(f.ingest(&fire(ChannelId::MotionSpike, 57.9)).is_none());
        assert_eq!(f.stats().suppressed, 2);
        assert!(f.ingest(&fire(ChannelId::MotionSpike, 58.0)).is_some());
        assert_eq!(f.stats().emitted, 2);
    }

    #[test]
    fn test_idle_signal_expires_cooldown() {
        let mut f = fusion(8.0);
        f.ingest(&fire(ChannelId::TextCue, 10.0));
        f.ingest(&TriggerSignal::idle(ChannelId::MotionSpike, 18.5));
        assert_eq!(f.state(), FusionState::Idle);
    }

    #[test]
    fn test_late_signal_inside_old_window_is_suppressed() {
        let mut f = fusion(8.0);
        f.ingest(&fire(ChannelId::TextCue, 100.0));
        f.observe_time(120.0);
        assert_eq!(f.state(), FusionState::Idle);
        // Audio lagging behind video reports an event from inside the window.
        assert!(f.ingest(&fire(ChannelId::AudioSustain, 104.0)).is_none());
    }

    #[test]
    fn test_same_timestamp_tie_break() {
        let mut f = fusion(8.0);
        let requests = f.ingest_batch(vec![
            fire(ChannelId::MotionSpike, 30.0),
            fire(ChannelId::AudioSustain, 30.0),
            fire(ChannelId::TextCue, 30.0),
        ]);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].trigger_channel, ChannelId::TextCue);
    }

    #[test]
    fn test_unconfigured_channel_uses_default_roll() {
        let mut f = fusion(8.0);
        let request = f.ingest(&fire(ChannelId::MotionSpike, 40.0)).unwrap();
        assert_eq!(request.pre_roll, RollConfig::default().pre_roll_secs);
    }

    fn arb_signal() -> impl Strategy<Value = TriggerSignal> {
        (0usize..3, 0.0f64..300.0, any::<bool>()).prop_map(|(c, t, fired)| {
            let channel = ChannelId::ALL[c];
            if fired {
                fire(channel, t)
            } else {
                TriggerSignal::idle(channel, t)
            }
        })
    }

    proptest! {
        #[test]
        fn emitted_anchors_are_a_cooldown_apart(
            cooldown in 0.5f64..30.0,
            mut signals in proptest::collection::vec(arb_signal(), 0..200),
            sorted in any::<bool>(),
        ) {
            if sorted {
                signals.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
            }
            let mut f = fusion(cooldown);
            let mut anchors: Vec<f64> = signals
                .iter()
                .filter_map(|s| f.ingest(s))
                .map(|r| r.event_timestamp)
                .collect();
            anchors.sort_by(f64::total_cmp);
            for pair in anchors.windows(2) {
                prop_assert!(pair[1] - pair[0] >= cooldown - 1e-9);
            }
        }
    }
}
