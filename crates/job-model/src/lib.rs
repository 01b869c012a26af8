//! Reelcast Job Model
//!
//! Defines the core data contracts shared by detection, queueing and rendering:
//! - **Streams:** `StreamHandle` and output `Orientation`
//! - **Signals:** per-channel `TriggerSignal`s and the fused `ClipRequest`
//! - **Jobs:** the durable `Job` record exchanged over the queue boundary
//! - **Leases:** registry records for hardware encoder/decoder claims
//!
//! All timestamps inside a stream are stream seconds (`f64`), anchored at the
//! first decoded packet of the current ingestion run.

pub mod clip;
pub mod job;
pub mod lease;
pub mod stream;

pub use clip::*;
pub use job::*;
pub use lease::*;
pub use stream::*;

/// Errors raised when a record violates a model invariant.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Invalid clip request: {message}")]
    InvalidRequest { message: String },

    #[error("Event at {event_secs:.2}s is outside the retained window [{start:.2}, {end:.2}]")]
    OutsideRetention { event_secs: f64, start: f64, end: f64 },

    #[error("Invalid job id {job_id:?}")]
    InvalidJobId { job_id: String },
}
