//! Per-channel liveness for a detection session.
//!
//! Every signal a channel emits counts as a heartbeat. A channel silent for
//! longer than `stall_factor` times its expected period is reported stalled;
//! the session keeps running on the remaining channels and reports itself
//! degraded until the channel recovers.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use reelcast_job_model::ChannelId;

/// Health transition for one channel.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthEvent {
    Stalled { channel: ChannelId, silent_secs: f64 },
    Recovered { channel: ChannelId },
}

/// Snapshot published to observers of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionHealth {
    /// True while at least one channel is stalled.
    pub degraded: bool,
    pub stalled: Vec<ChannelId>,
    pub active: Vec<ChannelId>,
}

#[derive(Debug, Clone)]
struct ChannelWatch {
    threshold: Duration,
    last_seen: Instant,
}

pub struct ChannelHealth {
    stall_factor: f64,
    min_threshold: Duration,
    channels: BTreeMap<ChannelId, ChannelWatch>,
    stalled: BTreeSet<ChannelId>,
}

impl ChannelHealth {
    /// `min_threshold` puts a floor under the stall threshold so very fast
    /// channels are not flagged by scheduling jitter.
    pub fn new(stall_factor: f64, min_threshold: Duration) -> Self {
        Self {
            stall_factor: stall_factor.max(1.0),
            min_threshold,
            channels: BTreeMap::new(),
            stalled: BTreeSet::new(),
        }
    }

    /// Start watching a channel; it counts as seen at `now`.
    pub fn register(&mut self, channel: ChannelId, expected_period_secs: f64, now: Instant) {
        let threshold = Duration::from_secs_f64((expected_period_secs * self.stall_factor).max(0.0))
            .max(self.min_threshold);
        self.channels.insert(
            channel,
            ChannelWatch {
                threshold,
                last_seen: now,
            },
        );
    }

    /// Record a heartbeat. Returns `Recovered` if the channel was stalled.
    pub fn observe(&mut self, channel: ChannelId, now: Instant) -> Option<HealthEvent> {
        let watch = self.channels.get_mut(&channel)?;
        watch.last_seen = now;
        if self.stalled.remove(&channel) {
            Some(HealthEvent::Recovered { channel })
        } else {
            None
        }
    }

    /// Flag channels that went silent. Each stall is reported once.
    pub fn check(&mut self, now: Instant) -> Vec<HealthEvent> {
        let mut events = Vec::new();
        for (channel, watch) in &self.channels {
            let silent = now.saturating_duration_since(watch.last_seen);
            if silent > watch.threshold && self.stalled.insert(*channel) {
                events.push(HealthEvent::Stalled {
                    channel: *channel,
                    silent_secs: silent.as_secs_f64(),
                });
            }
        }
        events
    }

    pub fn snapshot(&self) -> SessionHealth {
        let stalled: Vec<ChannelId> = self.stalled.iter().copied().collect();
        let active = self
            .channels
            .keys()
            .filter(|c| !self.stalled.contains(c))
            .copied()
            .collect();
        SessionHealth {
            degraded: !stalled.is_empty(),
            stalled,
            active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health(now: Instant) -> ChannelHealth {
        let mut h = ChannelHealth::new(3.0, Duration::from_millis(100));
        h.register(ChannelId::TextCue, 0.4, now);
        h.register(ChannelId::AudioSustain, 0.1, now);
        h
    }

    #[test]
    fn test_silent_channel_stalls_once() {
        let t0 = Instant::now();
        let mut h = health(t0);
        h.observe(ChannelId::AudioSustain, t0 + Duration::from_millis(1250));

        let events = h.check(t0 + Duration::from_millis(1300));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], HealthEvent::Stalled { channel: ChannelId::TextCue, .. }));
        assert!(h.check(t0 + Duration::from_millis(1320)).is_empty());

        let snap = h.snapshot();
        assert!(snap.degraded);
        assert_eq!(snap.stalled, vec![ChannelId::TextCue]);
        assert_eq!(snap.active, vec![ChannelId::AudioSustain]);
    }

    #[test]
    fn test_recovery_clears_degraded() {
        let t0 = Instant::now();
        let mut h = health(t0);
        h.check(t0 + Duration::from_secs(5));
        assert!(h.snapshot().degraded);

        let event = h.observe(ChannelId::TextCue, t0 + Duration::from_secs(6));
        assert_eq!(event, Some(HealthEvent::Recovered { channel: ChannelId::TextCue }));
        h.observe(ChannelId::AudioSustain, t0 + Duration::from_secs(6));
        assert!(!h.snapshot().degraded);
    }

    #[test]
    fn test_min_threshold_floor() {
        let t0 = Instant::now();
        let mut h = ChannelHealth::new(3.0, Duration::from_secs(1));
        h.register(ChannelId::MotionSpike, 0.04, t0);
        assert!(h.check(t0 + Duration::from_millis(500)).is_empty());
        assert_eq!(h.check(t0 + Duration::from_millis(1500)).len(), 1);
    }

    #[test]
    fn test_unregistered_channel_ignored() {
        let t0 = Instant::now();
        let mut h = health(t0);
        assert_eq!(h.observe(ChannelId::MotionSpike, t0), None);
    }
}
