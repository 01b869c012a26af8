//! Reelcast Durable State
//!
//! Cross-process state kept as plain files so that crashes, restarts, and an
//! external supervisor can all reason about it:
//! - **Job queue:** directory-of-files queue with atomic enqueue/claim/complete
//! - **Registry:** hardware lease slots and live session records
//!
//! Every mutation is either a write-to-temp-then-rename or an exclusive
//! create, so no observer ever reads a half-written record.

pub mod atomic;
pub mod owner;
pub mod queue;
pub mod registry;

pub use owner::OwnerTag;
pub use queue::{Completion, FileJobQueue, QueueDepth, RecoveryReport};
pub use registry::{LeaseGuard, LeaseRegistry, ResetReport, SessionGuard};
