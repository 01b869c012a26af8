//! Watch a live stream and extract highlights.

use std::sync::atomic::Ordering;
use std::time::Duration;

use reelcast_common::config::AppConfig;
use reelcast_detector::recognizer::recognizer_from_name;
use reelcast_durable::{FileJobQueue, LeaseRegistry};
use reelcast_ingest::{normalize_uri, DetectionSession, FfmpegStreamSource, SessionDeps};
use reelcast_job_model::{Orientation, StreamHandle};

use super::interrupt_flag;

pub async fn run(
    config: AppConfig,
    match_name: String,
    source: String,
    vertical: bool,
) -> anyhow::Result<()> {
    let uri = normalize_uri(&source)?;
    let orientation = if vertical {
        Orientation::Vertical
    } else {
        Orientation::Standard
    };
    let match_dir = config.paths.matches_dir.join(&match_name);

    println!("Watching match: {match_name}");
    println!("  Source: {uri}");
    println!("  Orientation: {}", orientation.as_str());
    println!("  Clips: {}", match_dir.display());
    println!();
    println!("Press Ctrl+C to stop...");
    println!();

    let queue = FileJobQueue::open(&config.paths.queue_dir)?;
    let registry = LeaseRegistry::open(&config.paths.registry_dir, config.render.encoder_slots)?;
    let interrupted = interrupt_flag();
    let cooldown = Duration::from_secs_f64(config.detection.restart_cooldown_secs.max(0.0));
    let mut restarts = 0u32;

    loop {
        let source = FfmpegStreamSource::spawn(&uri, &match_dir, &config.detection)?;
        let deps = SessionDeps {
            config: config.clone(),
            queue: queue.clone(),
            registry: registry.clone(),
            recognizer: recognizer_from_name(&config.detection.text_cue.recognizer),
            reframer: None,
        };
        let handle = StreamHandle::new(match_name.clone(), uri.clone(), orientation);
        let session = DetectionSession::start(handle, Box::new(source), deps).await?;

        let session_stop = session.stop_flag();
        let forward = {
            let interrupted = interrupted.clone();
            tokio::spawn(async move {
                while !interrupted.load(Ordering::SeqCst) {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                session_stop.store(true, Ordering::SeqCst);
            })
        };
        let result = session.wait().await;
        forward.abort();

        match result {
            Ok(summary) => {
                println!("Session ended.");
                println!("  Frames analyzed: {}", summary.frames);
                println!("  Events: {} ({} suppressed)", summary.events, summary.suppressed);
                println!("  Clips: {}", summary.clips);
                if summary.extraction_failures > 0 {
                    println!("  Extraction failures: {}", summary.extraction_failures);
                }
                println!("  Restarts: {restarts}");
                return Ok(());
            }
            Err(e) if !interrupted.load(Ordering::SeqCst) => {
                restarts += 1;
                tracing::warn!(
                    match_name = %match_name,
                    error = %e,
                    restarts,
                    "Session failed, restarting"
                );
                tokio::time::sleep(cooldown).await;
                if interrupted.load(Ordering::SeqCst) {
                    return Ok(());
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}
