//! Reelcast Ingest
//!
//! Live side of the system:
//! - Media sources that decode a stream into analysis frames and audio
//! - The retained recording clips are cut from
//! - The clip extractor that turns fused events into queued jobs
//! - Detection sessions wiring channels, fusion, and health together

pub mod extractor;
pub mod ffmpeg;
pub mod session;
pub mod source;

pub use extractor::{ClipExtractor, ExtractedClip};
pub use ffmpeg::{FfmpegStreamSource, RecordingBuffer};
pub use session::{DetectionSession, SessionDeps, SessionState, SessionSummary};
pub use source::{normalize_uri, MediaPacket, MediaSource, RetainedMedia, SourcePoll};
