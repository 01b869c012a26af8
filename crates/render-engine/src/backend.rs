//! Render backends.

use std::path::Path;
use std::sync::atomic::AtomicBool;

use reelcast_common::error::ReelResult;

use crate::ffmpeg::{command_exists, probe_duration, run_ffmpeg, ProgressCallback};
use crate::plan::RenderPlan;

/// Trait for render backends (ffmpeg, test fakes).
pub trait RenderBackend: Send {
    /// Execute the plan, writing `plan.output_path`.
    fn render(
        &mut self,
        plan: &RenderPlan,
        progress: Option<ProgressCallback>,
        cancel: &AtomicBool,
    ) -> ReelResult<()>;

    /// Duration of a media file, used only for progress reporting.
    fn probe_duration(&self, _path: &Path) -> Option<f64> {
        None
    }

    /// Check if this backend is available on the system.
    fn is_available(&self) -> bool;

    /// Backend name.
    fn name(&self) -> &str;
}

/// Runs plans through the ffmpeg binary.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    program: String,
}

impl FfmpegBackend {
    pub fn new() -> Self {
        Self::with_program("ffmpeg")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderBackend for FfmpegBackend {
    fn render(
        &mut self,
        plan: &RenderPlan,
        progress: Option<ProgressCallback>,
        cancel: &AtomicBool,
    ) -> ReelResult<()> {
        run_ffmpeg(
            &self.program,
            &plan.args,
            plan.expected_duration_secs,
            progress,
            cancel,
        )
    }

    fn probe_duration(&self, path: &Path) -> Option<f64> {
        probe_duration(path)
    }

    fn is_available(&self) -> bool {
        command_exists(&self.program)
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

impl<B: RenderBackend + ?Sized> RenderBackend for Box<B> {
    fn render(
        &mut self,
        plan: &RenderPlan,
        progress: Option<ProgressCallback>,
        cancel: &AtomicBool,
    ) -> ReelResult<()> {
        (**self).render(plan, progress, cancel)
    }

    fn probe_duration(&self, path: &Path) -> Option<f64> {
        (**self).probe_duration(path)
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
