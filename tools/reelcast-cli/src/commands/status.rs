//! Show queue depth or one job.

use reelcast_common::config::AppConfig;
use reelcast_durable::FileJobQueue;
use reelcast_job_model::JobStatus;

/// Failed jobs listed in the overview.
const RECENT_FAILURES: usize = 5;

pub fn run(config: &AppConfig, job_id: Option<String>, json: bool) -> anyhow::Result<()> {
    let queue = FileJobQueue::open(&config.paths.queue_dir)?;

    if let Some(job_id) = job_id {
        let job = queue
            .get(&job_id)?
            .ok_or_else(|| anyhow::anyhow!("Job {job_id} not found"))?;
        if json {
            println!("{}", serde_json::to_string_pretty(&job)?);
            return Ok(());
        }
        println!("Job: {}", job.job_id);
        println!("  Status: {}", job.status.as_str());
        println!("  Kind: {:?}", job.kind);
        println!("  Clip: {}", job.source_clip_path.display());
        println!("  Orientation: {}", job.orientation.as_str());
        println!("  Group: {}", job.group);
        println!("  Created: {}", job.created_at);
        if let Some(ref origin) = job.origin {
            println!(
                "  Event: {:.1}s via {} (window {:.1}s-{:.1}s{})",
                origin.event_timestamp,
                origin.trigger_channel.as_str(),
                origin.window.start,
                origin.window.end,
                if origin.window.partial { ", partial" } else { "" }
            );
        }
        if let Some(ref output) = job.output_path {
            println!("  Output: {}", output.display());
        }
        if let Some(ref diagnostic) = job.diagnostic {
            println!("  Diagnostic: {diagnostic}");
        }
        return Ok(());
    }

    let depth = queue.depth()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&depth)?);
        return Ok(());
    }

    println!("Queue: {}", queue.root().display());
    println!("  Pending: {}", depth.pending);
    println!("  Processing: {}", depth.processing);
    println!("  Done: {}", depth.done);
    println!("  Failed: {}", depth.failed);
    if depth.quarantined > 0 {
        println!("  Quarantined: {}", depth.quarantined);
    }

    let mut failed = queue.list(JobStatus::Failed)?;
    failed.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));
    if !failed.is_empty() {
        println!();
        println!("Recent failures:");
        for job in failed.iter().take(RECENT_FAILURES) {
            let diagnostic = job.diagnostic.as_deref().unwrap_or("");
            let first_line = diagnostic.lines().next().unwrap_or("");
            println!("  {} {}: {first_line}", job.job_id, job.source_clip_path.display());
        }
    }
    Ok(())
}
