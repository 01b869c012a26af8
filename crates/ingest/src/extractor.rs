//! Clip extraction: fused event in, clip file and queued job out.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reelcast_common::clock::StreamClock;
use reelcast_common::config::{DetectionConfig, RenderConfig};
use reelcast_common::error::{ReelError, ReelResult};
use reelcast_durable::atomic::remove_if_exists;
use reelcast_durable::{FileJobQueue, LeaseRegistry};
use reelcast_job_model::{
    BrandingProfile, ClipRequest, ClipWindow, Job, LeasePurpose, Orientation,
};
use reelcast_render_engine::pipeline::part_path_for;
use reelcast_render_engine::{make_vertical, FfmpegBackend, RenderBackend};

use crate::source::RetainedMedia;

/// Standard-orientation clips of a match.
pub const FULL_SCREEN_DIR: &str = "Full Screen";
/// Vertical reel clips of a match.
pub const REEL_DIR: &str = "Reel";

const COVERAGE_POLL: Duration = Duration::from_millis(250);

/// Files and jobs produced for one event.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedClip {
    pub window: ClipWindow,
    pub clip_path: PathBuf,
    pub reel_path: Option<PathBuf>,
    pub job_ids: Vec<String>,
}

pub struct ClipExtractor {
    match_dir: PathBuf,
    detection: DetectionConfig,
    render: RenderConfig,
    queue: FileJobQueue,
    registry: LeaseRegistry,
    retained: Arc<dyn RetainedMedia>,
    clock: StreamClock,
    reframer: Arc<Mutex<Box<dyn RenderBackend>>>,
    session_id: String,
}

impl ClipExtractor {
    pub fn new(
        match_dir: impl Into<PathBuf>,
        detection: &DetectionConfig,
        render: &RenderConfig,
        queue: FileJobQueue,
        registry: LeaseRegistry,
        retained: Arc<dyn RetainedMedia>,
    ) -> Self {
        Self {
            match_dir: match_dir.into(),
            detection: detection.clone(),
            render: render.clone(),
            queue,
            registry,
            retained,
            clock: StreamClock::start(),
            reframer: Arc::new(Mutex::new(Box::new(FfmpegBackend::new()))),
            session_id: String::new(),
        }
    }

    /// Clock used to name clips after the wall time of their event.
    pub fn with_clock(mut self, clock: StreamClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_reframer(mut self, backend: Box<dyn RenderBackend>) -> Self {
        self.reframer = Arc::new(Mutex::new(backend));
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    fn branding(&self) -> BrandingProfile {
        BrandingProfile {
            watermark: self.render.auto_watermark.clone(),
            intro: self.render.auto_intro,
            outro: self.render.auto_outro,
        }
    }

    /// Wait until the retained media covers the request, or the wait budget
    /// (`post_roll + extract_grace_secs`) runs out, or the source ends.
    async fn wait_for_coverage(&self, request: &ClipRequest) {
        let budget = Duration::from_secs_f64(
            (request.post_roll + self.detection.extract_grace_secs).max(0.0),
        );
        let deadline = tokio::time::Instant::now() + budget;
        loop {
            if self.retained.window().end >= request.requested_end() || self.retained.is_finished() {
                return;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                tracing::warn!(
                    stream_id = %request.stream_id,
                    event_secs = request.event_timestamp,
                    "Buffer did not reach the requested end in time, clip will be partial"
                );
                return;
            }
            tokio::time::sleep(COVERAGE_POLL.min(deadline - now)).await;
        }
    }

    /// Cut the clip for `request`, produce the reel variant when configured,
    /// and enqueue a `detected` job for each file.
    ///
    /// Fails when the event has already left the retention window.
    pub async fn extract(&self, request: ClipRequest) -> ReelResult<ExtractedClip> {
        self.wait_for_coverage(&request).await;

        let window = ClipWindow::resolve(&request, self.retained.window())
            .map_err(|e| ReelError::extraction(e.to_string()))?;
        if window.duration() <= 0.0 {
            return Err(ReelError::extraction(format!(
                "no media retained around {:.2}s",
                request.event_timestamp
            )));
        }

        let unix = self.clock.wall_at(request.event_timestamp).timestamp();
        let stem = format!("ball_{unix}_{}", request.trigger_channel.as_str());
        let clip_path = match request.orientation {
            Orientation::Standard => {
                unique_path(&self.match_dir.join(FULL_SCREEN_DIR), &stem, "")?
            }
            Orientation::Vertical => unique_path(
                &self.match_dir.join(REEL_DIR),
                &stem,
                Orientation::VERTICAL_SUFFIX,
            )?,
        };

        let retained = self.retained.clone();
        let (cut_window, cut_path) = (window, clip_path.clone());
        tokio::task::spawn_blocking(move || cut_atomically(retained.as_ref(), &cut_window, &cut_path))
            .await
            .map_err(|e| ReelError::extraction(format!("cut task failed: {e}")))??;

        let mut job_ids = Vec::with_capacity(2);
        let job = Job::detected(&request, window, &clip_path, request.orientation, self.branding());
        self.queue.enqueue(&job)?;
        job_ids.push(job.job_id.clone());
        tracing::info!(
            job_id = %job.job_id,
            clip = %clip_path.display(),
            start = window.start,
            end = window.end,
            partial = window.partial,
            "Clip extracted"
        );

        let mut reel_path = None;
        if self.detection.reel_variant && request.orientation == Orientation::Standard {
            match self.reframe(&clip_path).await {
                Ok(path) => {
                    let reel_job =
                        Job::detected(&request, window, &path, Orientation::Vertical, self.branding());
                    self.queue.enqueue(&reel_job)?;
                    job_ids.push(reel_job.job_id);
                    reel_path = Some(path);
                }
                Err(e) => {
                    tracing::warn!(clip = %clip_path.display(), error = %e, "Reel variant skipped");
                }
            }
        }

        Ok(ExtractedClip {
            window,
            clip_path,
            reel_path,
            job_ids,
        })
    }

    /// Produce `<match>/Reel/<stem>_V.mp4` under an encoder lease.
    async fn reframe(&self, clip_path: &Path) -> ReelResult<PathBuf> {
        let stem = clip_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let reel_path = unique_path(
            &self.match_dir.join(REEL_DIR),
            &stem,
            Orientation::VERTICAL_SUFFIX,
        )?;

        let registry = self.registry.clone();
        let reframer = self.reframer.clone();
        let render = self.render.clone();
        let session_id = self.session_id.clone();
        let input = clip_path.to_path_buf();
        let output = reel_path.clone();
        tokio::task::spawn_blocking(move || -> ReelResult<()> {
            let never = AtomicBool::new(false);
            let lease = registry.acquire_with_timeout(
                LeasePurpose::Reframe {
                    clip: input.to_string_lossy().into_owned(),
                },
                &session_id,
                Duration::from_secs_f64(render.lease_wait_secs.max(0.0)),
                None,
            )?;
            let mut backend = reframer
                .lock()
                .map_err(|_| ReelError::extraction("reframe backend poisoned"))?;
            let result = make_vertical(backend.as_mut(), &input, &output, &render, &never);
            drop(backend);
            lease.release()?;
            result
        })
        .await
        .map_err(|e| ReelError::extraction(format!("reframe task failed: {e}")))??;
        Ok(reel_path)
    }
}

fn cut_atomically(retained: &dyn RetainedMedia, window: &ClipWindow, out: &Path) -> ReelResult<()> {
    let part = part_path_for(out);
    if let Err(e) = retained.cut(window, &part).and_then(|()| {
        std::fs::rename(&part, out)?;
        Ok(())
    }) {
        let _ = remove_if_exists(&part);
        return Err(e);
    }
    Ok(())
}

/// `<dir>/<stem><suffix>.mp4`, adding `_<n>` if that name is taken.
fn unique_path(dir: &Path, stem: &str, suffix: &str) -> ReelResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let first = dir.join(format!("{stem}{suffix}.mp4"));
    if !first.exists() {
        return Ok(first);
    }
    for n in 2..1000 {
        let candidate = dir.join(format!("{stem}_{n}{suffix}.mp4"));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(ReelError::extraction(format!(
        "too many clips named {stem} in {}",
        dir.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_path_keeps_vertical_suffix_last() {
        let dir = tempfile::tempdir().unwrap();
        let first = unique_path(dir.path(), "ball_1_audio_sustain", "_V").unwrap();
        assert_eq!(first.file_name().unwrap(), "ball_1_audio_sustain_V.mp4");
        std::fs::write(&first, b"x").unwrap();
        let second = unique_path(dir.path(), "ball_1_audio_sustain", "_V").unwrap();
        assert_eq!(second.file_name().unwrap(), "ball_1_audio_sustain_2_V.mp4");
        assert_eq!(Orientation::from_clip_name(&second), Orientation::Vertical);
    }
}
