//! Run render workers.

use reelcast_common::config::AppConfig;
use reelcast_durable::{FileJobQueue, LeaseRegistry};
use reelcast_render_engine::{BrandingPipeline, FfmpegBackend, RenderBackend, RenderWorker, WorkerStats};

use super::interrupt_flag;

pub async fn run(mut config: AppConfig, slots: Option<u32>) -> anyhow::Result<()> {
    if let Some(slots) = slots {
        config.render.encoder_slots = slots;
    }
    let slots = config.render.encoder_slots.max(1);

    let backend = FfmpegBackend::new();
    if !backend.is_available() {
        return Err(anyhow::anyhow!("ffmpeg not found in PATH"));
    }

    let queue = FileJobQueue::open(&config.paths.queue_dir)?;
    let registry = LeaseRegistry::open(&config.paths.registry_dir, slots)?;
    let depth = queue.depth()?;

    println!("Starting {slots} render worker(s)");
    println!("  Queue: {} ({} pending)", config.paths.queue_dir.display(), depth.pending);
    println!("  Output: {}", config.paths.output_dir.display());
    println!("  Encoder: {} ({})", config.render.encoder, config.render.preset);
    println!();
    println!("Press Ctrl+C to stop...");
    println!();

    let shutdown = interrupt_flag();
    let mut handles = Vec::with_capacity(slots as usize);
    for i in 0..slots {
        let pipeline = BrandingPipeline::new(
            FfmpegBackend::new(),
            registry.clone(),
            config.render.clone(),
            config.paths.clone(),
            format!("worker-{i}"),
        );
        let worker = RenderWorker::new(queue.clone(), pipeline, &config.render);
        handles.push(tokio::spawn(worker.run(shutdown.clone())));
    }

    let mut total = WorkerStats::default();
    for handle in handles {
        let stats = handle.await??;
        total.completed += stats.completed;
        total.failed += stats.failed;
        total.requeued += stats.requeued;
        total.queue_errors += stats.queue_errors;
    }

    println!("Workers stopped.");
    println!("  Completed: {}", total.completed);
    println!("  Failed: {}", total.failed);
    println!("  Requeued: {}", total.requeued);
    Ok(())
}
