//! Vertical reframing of standard clips for reel output.

use std::path::Path;
use std::sync::atomic::AtomicBool;

use reelcast_common::config::RenderConfig;
use reelcast_common::error::{ReelError, ReelResult};
use reelcast_durable::atomic::remove_if_exists;

use crate::backend::RenderBackend;
use crate::ffmpeg::base_args;
use crate::pipeline::part_path_for;
use crate::plan::RenderPlan;

/// Center-crop plan filling the vertical target resolution.
pub fn reframe_plan(input: &Path, output: &Path, config: &RenderConfig) -> RenderPlan {
    let (w, h) = (config.vertical_width, config.vertical_height);
    let mut args = base_args();
    if let Some(hwaccel) = config.hwaccel.as_deref().filter(|h| !h.is_empty()) {
        args.push("-hwaccel".into());
        args.push(hwaccel.to_string());
    }
    args.push("-i".into());
    args.push(input.to_string_lossy().into_owned());
    args.push("-vf".into());
    args.push(format!(
        "scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},setsar=1"
    ));
    args.extend(
        [
            "-c:v".to_string(),
            config.encoder.clone(),
            "-preset".to_string(),
            config.preset.clone(),
            "-b:v".to_string(),
            format!("{}k", config.video_bitrate_kbps.max(500)),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            format!("{}k", config.audio_bitrate_kbps.max(64)),
            "-f".to_string(),
            "mp4".to_string(),
        ]
        .into_iter(),
    );
    args.push(output.to_string_lossy().into_owned());

    RenderPlan {
        args,
        output_path: output.to_path_buf(),
        expected_duration_secs: 0.0,
        segments: 1,
    }
}

/// Produce a vertical copy of `input` at `output`.
///
/// The caller holds the encoder lease. Written through a `.part` file so a
/// failed reframe never leaves a truncated reel clip behind.
pub fn make_vertical(
    backend: &mut dyn RenderBackend,
    input: &Path,
    output: &Path,
    config: &RenderConfig,
    cancel: &AtomicBool,
) -> ReelResult<()> {
    if !input.is_file() {
        return Err(ReelError::FileNotFound {
            path: input.to_path_buf(),
        });
    }
    let part = part_path_for(output);
    let mut plan = reframe_plan(input, &part, config);
    plan.expected_duration_secs = backend.probe_duration(input).unwrap_or(0.0);

    let result = backend.render(&plan, None, cancel).and_then(|()| {
        std::fs::rename(&part, output)?;
        Ok(())
    });
    if result.is_err() {
        let _ = remove_if_exists(&part);
    }
    result?;
    tracing::info!(input = %input.display(), output = %output.display(), "Reframed clip to vertical");
    Ok(())
}
