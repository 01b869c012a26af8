//! Long-running render worker: claim, render, complete, repeat.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reelcast_common::config::RenderConfig;
use reelcast_common::error::{ReelError, ReelResult};
use reelcast_durable::{Completion, FileJobQueue};

use crate::backend::RenderBackend;
use crate::pipeline::BrandingPipeline;

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// What one pass of the worker did.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkOutcome {
    /// Nothing was pending.
    Idle,
    Completed { job_id: String, output: PathBuf },
    Failed { job_id: String, diagnostic: String },
    /// Shutdown interrupted the render, or no encoder slot freed up in
    /// time; the job is pending again.
    Requeued { job_id: String },
}

/// Counters reported when the worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: u64,
    pub failed: u64,
    pub requeued: u64,
    pub queue_errors: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: &WorkOutcome) {
        match outcome {
            WorkOutcome::Idle => {}
            WorkOutcome::Completed { .. } => self.completed += 1,
            WorkOutcome::Failed { .. } => self.failed += 1,
            WorkOutcome::Requeued { .. } => self.requeued += 1,
        }
    }
}

pub struct RenderWorker<B: RenderBackend> {
    queue: FileJobQueue,
    pipeline: BrandingPipeline<B>,
    poll_interval: Duration,
    error_backoff: Duration,
}

impl<B: RenderBackend + 'static> RenderWorker<B> {
    pub fn new(queue: FileJobQueue, pipeline: BrandingPipeline<B>, config: &RenderConfig) -> Self {
        Self {
            queue,
            pipeline,
            poll_interval: Duration::from_secs_f64(config.poll_interval_secs.max(0.05)),
            error_backoff: Duration::from_secs_f64(config.error_backoff_secs.max(0.05)),
        }
    }

    /// Claim and process at most one job. Blocking.
    ///
    /// Render failures are recorded in the queue's error store and reported
    /// as [`WorkOutcome::Failed`]; only queue-level problems are `Err`.
    pub fn process_next(&mut self, cancel: &AtomicBool) -> ReelResult<WorkOutcome> {
        let Some(job) = self.queue.claim()? else {
            return Ok(WorkOutcome::Idle);
        };
        let job_id = job.job_id.clone();
        tracing::info!(
            job_id = %job_id,
            kind = ?job.kind,
            source = %job.source_clip_path.display(),
            "Claimed job"
        );

        match self.pipeline.render_job(&job, cancel) {
            Ok(output) => {
                self.queue.complete(
                    &job_id,
                    Completion::Succeeded {
                        output: output.clone(),
                    },
                )?;
                Ok(WorkOutcome::Completed { job_id, output })
            }
            Err(e) if e.is_retryable() => {
                tracing::info!(job_id = %job_id, reason = %e, "Requeueing job");
                self.queue.requeue(&job_id)?;
                Ok(WorkOutcome::Requeued { job_id })
            }
            Err(e) => {
                let diagnostic = e.to_string();
                self.queue.complete(
                    &job_id,
                    Completion::Failed {
                        diagnostic: diagnostic.clone(),
                    },
                )?;
                Ok(WorkOutcome::Failed { job_id, diagnostic })
            }
        }
    }

    /// Run until `shutdown` is set.
    ///
    /// Recovers orphaned jobs first, then loops. Setting `shutdown` during a
    /// render kills the encoder, releases its lease, and requeues the job.
    pub async fn run(mut self, shutdown: Arc<AtomicBool>) -> ReelResult<WorkerStats> {
        let report = self.queue.recover()?;
        tracing::info!(
            requeued = report.requeued.len(),
            finalized = report.finalized.len(),
            quarantined = report.quarantined,
            backend = self.pipeline.backend().name(),
            "Render worker started"
        );

        let mut stats = WorkerStats::default();
        while !shutdown.load(Ordering::SeqCst) {
            let cancel = shutdown.clone();
            let (worker, outcome) = tokio::task::spawn_blocking(move || {
                let outcome = self.process_next(&cancel);
                (self, outcome)
            })
            .await
            .map_err(|e| ReelError::render(format!("render task panicked: {e}")))?;
            self = worker;

            match outcome {
                Ok(WorkOutcome::Idle) => sleep_unless(&shutdown, self.poll_interval).await,
                Ok(outcome) => stats.record(&outcome),
                Err(e) => {
                    stats.queue_errors += 1;
                    tracing::error!(error = %e, "Queue error, backing off");
                    sleep_unless(&shutdown, self.error_backoff).await;
                }
            }
        }

        tracing::info!(
            completed = stats.completed,
            failed = stats.failed,
            requeued = stats.requeued,
            "Render worker stopped"
        );
        Ok(stats)
    }
}

async fn sleep_unless(flag: &AtomicBool, duration: Duration) {
    let deadline = tokio::time::Instant::now() + duration;
    while !flag.load(Ordering::SeqCst) {
        let now = tokio::time::Instant::now();
        if now >= deadline {
            break;
        }
        tokio::time::sleep(SHUTDOWN_POLL.min(deadline - now)).await;
    }
}
