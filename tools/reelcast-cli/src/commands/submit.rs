//! Queue a clip for branding.

use std::path::PathBuf;

use reelcast_common::config::AppConfig;
use reelcast_durable::FileJobQueue;
use reelcast_job_model::{BrandingProfile, Job, Orientation};

pub fn run(
    config: &AppConfig,
    clip: PathBuf,
    match_name: String,
    logo: Option<String>,
    intro: bool,
    outro: bool,
    vertical: bool,
) -> anyhow::Result<()> {
    let clip = clip
        .canonicalize()
        .map_err(|e| anyhow::anyhow!("Clip {} not readable: {e}", clip.display()))?;
    if let Some(ref logo) = logo {
        if !config.paths.logos_dir.join(logo).is_file() {
            tracing::warn!(logo = %logo, "Watermark not found in logos directory, render will skip it");
        }
    }

    let orientation = vertical.then_some(Orientation::Vertical);
    let branding = BrandingProfile {
        watermark: logo,
        intro,
        outro,
    };
    let job = Job::manual(&clip, match_name, orientation, branding);

    let queue = FileJobQueue::open(&config.paths.queue_dir)?;
    queue.enqueue(&job)?;

    println!("Queued job {}", job.job_id);
    println!("  Clip: {}", clip.display());
    println!("  Orientation: {}", job.orientation.as_str());
    println!("  Group: {}", job.group);
    Ok(())
}
