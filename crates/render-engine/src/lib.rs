//! Reelcast Render Engine
//!
//! Turns queued clip jobs into branded deliverables:
//! - Render profile resolution (target resolution, overlay geometry, assets)
//! - ffmpeg plan building (normalize, watermark, intro/outro concat)
//! - A process-backed render backend with progress and cancellation
//! - The branding pipeline and the long-running render worker
//! - Vertical reframing used by the clip extractor

pub mod backend;
pub mod ffmpeg;
pub mod pipeline;
pub mod plan;
pub mod profile;
pub mod reframe;
pub mod worker;

pub use backend::{FfmpegBackend, RenderBackend};
pub use ffmpeg::{ProgressCallback, RenderProgress, RenderStage};
pub use pipeline::BrandingPipeline;
pub use plan::{build_branding_plan, RenderPlan};
pub use profile::{OverlaySpec, RenderProfile};
pub use reframe::make_vertical;
pub use worker::{RenderWorker, WorkOutcome, WorkerStats};
