//! Clock and cadence utilities for live stream analysis.
//!
//! All timestamps flowing through detection are *stream seconds*: seconds
//! since the first decoded packet of the current ingestion run. This module
//! provides:
//! - The session clock (wall-clock anchor + monotonic elapsed)
//! - A cadence gate that lets a channel sample at its own period
//! - Audio/video drift measurement

use std::time::Instant;

/// A session clock: monotonic elapsed time anchored to a wall-clock start.
#[derive(Debug, Clone)]
pub struct StreamClock {
    /// The instant the session started.
    epoch: Instant,

    /// Wall-clock time at epoch.
    epoch_wall: chrono::DateTime<chrono::Utc>,
}

impl StreamClock {
    /// Create a new clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now(),
        }
    }

    /// Seconds elapsed since session start.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at session start.
    pub fn epoch_wall(&self) -> chrono::DateTime<chrono::Utc> {
        self.epoch_wall
    }

    /// The underlying epoch instant.
    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    /// Wall-clock time of a stream timestamp, assuming real-time ingestion.
    pub fn wall_at(&self, stream_secs: f64) -> chrono::DateTime<chrono::Utc> {
        self.epoch_wall + chrono::Duration::milliseconds((stream_secs * 1000.0) as i64)
    }
}

/// Gate that opens at most once per `period_secs` of stream time.
#[derive(Debug, Clone)]
pub struct Cadence {
    period_secs: f64,
    last_tick: Option<f64>,
}

impl Cadence {
    pub fn new(period_secs: f64) -> Self {
        Self {
            period_secs: period_secs.max(0.0),
            last_tick: None,
        }
    }

    /// Returns true and records the tick if `now` is at least one period past
    /// the last tick. The first call always ticks.
    pub fn should_tick(&mut self, now: f64) -> bool {
        match self.last_tick {
            Some(last) if now < last + self.period_secs => false,
            _ => {
                self.last_tick = Some(now);
                true
            }
        }
    }

    pub fn period_secs(&self) -> f64 {
        self.period_secs
    }

    /// Forget the last tick (e.g., after a source restart rewinds timestamps).
    pub fn reset(&mut self) {
        self.last_tick = None;
    }
}

/// Drift between the video and audio timelines of one stream.
#[derive(Debug, Clone, Copy)]
pub struct AvDrift {
    /// Latest video timestamp (stream seconds).
    pub video_secs: f64,
    /// Latest audio timestamp (stream seconds).
    pub audio_secs: f64,
}

impl AvDrift {
    /// Drift in milliseconds (positive = audio is ahead).
    pub fn drift_ms(&self) -> f64 {
        (self.audio_secs - self.video_secs) * 1000.0
    }

    /// Whether drift exceeds an acceptable threshold.
    pub fn exceeds_threshold_ms(&self, threshold_ms: f64) -> bool {
        self.drift_ms().abs() > threshold_ms
    }
}
