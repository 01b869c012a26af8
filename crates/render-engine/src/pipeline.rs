//! Branding render pipeline: one claimed job in, one final file out.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use reelcast_common::config::{PathsConfig, RenderConfig};
use reelcast_common::error::{ReelError, ReelResult};
use reelcast_durable::atomic::remove_if_exists;
use reelcast_durable::LeaseRegistry;
use reelcast_job_model::{final_output_name, Job, LeasePurpose};

use crate::backend::RenderBackend;
use crate::ffmpeg::{ProgressCallback, RenderStage};
use crate::plan::{build_branding_plan, segment_paths};
use crate::profile::RenderProfile;

/// Output group for jobs that carry none.
pub const UNGROUPED: &str = "ungrouped";

pub struct BrandingPipeline<B: RenderBackend> {
    backend: B,
    registry: LeaseRegistry,
    config: RenderConfig,
    paths: PathsConfig,
    session_id: String,
}

impl<B: RenderBackend> BrandingPipeline<B> {
    pub fn new(
        backend: B,
        registry: LeaseRegistry,
        config: RenderConfig,
        paths: PathsConfig,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            registry,
            config,
            paths,
            session_id: session_id.into(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// `output/<group>/final_<stem>.mp4`.
    pub fn output_path_for(&self, job: &Job) -> PathBuf {
        self.paths
            .output_dir
            .join(output_group(&job.group))
            .join(final_output_name(&job.source_clip_path))
    }

    /// Render `job` to its final location and return that path.
    ///
    /// The render goes to a hidden `.part` file that is renamed into place
    /// on success and removed on failure, so a final output is never
    /// partial. When hardware encoding is configured the render runs under
    /// an encoder lease, released on every exit path.
    pub fn render_job(&mut self, job: &Job, cancel: &AtomicBool) -> ReelResult<PathBuf> {
        let started = Instant::now();
        let source = &job.source_clip_path;
        if !source.is_file() {
            return Err(ReelError::FileNotFound {
                path: source.clone(),
            });
        }

        let profile = RenderProfile::resolve(job, &self.config, &self.paths)?;
        let final_path = self.output_path_for(job);
        let out_dir = final_path
            .parent()
            .ok_or_else(|| ReelError::render("output path has no parent"))?;
        fs::create_dir_all(out_dir)?;
        let part_path = part_path_for(&final_path);

        let durations: Vec<Option<f64>> = segment_paths(source, &profile)
            .into_iter()
            .map(|p| self.backend.probe_duration(p))
            .collect();
        let plan = build_branding_plan(source, &profile, &part_path, &durations);

        let lease = if self.config.hardware {
            Some(self.registry.acquire_with_timeout(
                LeasePurpose::Render {
                    job_id: job.job_id.clone(),
                },
                &self.session_id,
                Duration::from_secs_f64(self.config.lease_wait_secs.max(0.0)),
                Some(cancel),
            )?)
        } else {
            None
        };

        tracing::info!(
            job_id = %job.job_id,
            orientation = job.orientation.as_str(),
            segments = plan.segments,
            watermark = profile.overlay.is_some(),
            slot = lease.as_ref().map(|l| l.slot()),
            backend = self.backend.name(),
            "Rendering job"
        );

        let result = self
            .backend
            .render(&plan, Some(log_progress(job.job_id.clone())), cancel)
            .and_then(|()| finalize(&part_path, &final_path));
        if let Some(lease) = lease {
            if let Err(e) = lease.release() {
                tracing::warn!(job_id = %job.job_id, error = %e, "Failed to release encoder lease");
            }
        }
        if let Err(e) = result {
            if let Err(cleanup) = remove_if_exists(&part_path) {
                tracing::warn!(path = %part_path.display(), error = %cleanup, "Failed to remove partial render");
            }
            return Err(e);
        }

        tracing::info!(
            job_id = %job.job_id,
            output = %final_path.display(),
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Render finished"
        );
        Ok(final_path)
    }
}

/// `.final_<stem>.mp4.part` next to the final output.
pub fn part_path_for(final_path: &Path) -> PathBuf {
    let name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output.mp4".to_string());
    final_path.with_file_name(format!(".{name}.part"))
}

/// Directory-safe output group name.
pub fn output_group(group: &str) -> String {
    let safe: String = group
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe.is_empty() || safe.chars().all(|c| c == '.') {
        UNGROUPED.to_string()
    } else {
        safe
    }
}

fn finalize(part_path: &Path, final_path: &Path) -> ReelResult<()> {
    let len = fs::metadata(part_path).map(|m| m.len()).unwrap_or(0);
    if len == 0 {
        return Err(ReelError::render("renderer produced no output"));
    }
    fs::rename(part_path, final_path)?;
    Ok(())
}

fn log_progress(job_id: String) -> ProgressCallback {
    let last_decile = AtomicU8::new(0);
    Box::new(move |p| {
        let decile = (p.progress * 10.0).floor() as u8;
        let previous = last_decile.fetch_max(decile, Ordering::Relaxed);
        if decile > previous || p.stage == RenderStage::Complete {
            tracing::debug!(
                job_id = %job_id,
                progress = p.progress,
                eta_secs = p.eta_secs,
                stage = ?p.stage,
                "Render progress"
            );
        }
    })
}
