//! ffmpeg invocation plans for branded renders.

use std::path::{Path, PathBuf};

use crate::ffmpeg::base_args;
use crate::profile::RenderProfile;

/// A fully-built ffmpeg invocation.
#[derive(Debug, Clone)]
pub struct RenderPlan {
    pub args: Vec<String>,

    /// File ffmpeg writes to.
    pub output_path: PathBuf,

    /// Sum of the segment durations, 0 when unknown. Only drives progress.
    pub expected_duration_secs: f64,

    /// Number of concatenated segments (intro, clip, outro).
    pub segments: usize,
}

struct Segment<'a> {
    input: usize,
    path: &'a Path,
    branded: bool,
}

/// Build the single-invocation branding render for `source`.
///
/// Every segment is scaled and cropped to the target resolution with audio
/// resampled to the profile rate, then all segments are concatenated. The
/// watermark is composited onto the clip segment only.
pub fn build_branding_plan(
    source: &Path,
    profile: &RenderProfile,
    output: &Path,
    durations: &[Option<f64>],
) -> RenderPlan {
    let mut segments = Vec::with_capacity(3);
    let mut input_paths: Vec<&Path> = Vec::with_capacity(4);
    for (path, branded) in [
        (profile.intro.as_deref(), false),
        (Some(source), true),
        (profile.outro.as_deref(), false),
    ] {
        if let Some(path) = path {
            segments.push(Segment {
                input: input_paths.len(),
                path,
                branded,
            });
            input_paths.push(path);
        }
    }
    let overlay_input = profile.overlay.as_ref().map(|_| input_paths.len());

    let mut args = base_args();
    for segment in &segments {
        if let Some(hwaccel) = &profile.hwaccel {
            args.push("-hwaccel".into());
            args.push(hwaccel.clone());
        }
        args.push("-i".into());
        args.push(segment.path.to_string_lossy().into_owned());
    }
    if let Some(overlay) = &profile.overlay {
        args.push("-loop".into());
        args.push("1".into());
        args.push("-i".into());
        args.push(overlay.path.to_string_lossy().into_owned());
    }

    args.push("-filter_complex".into());
    args.push(filter_graph(&segments, profile, overlay_input));
    args.extend(
        ["-map", "[outv]", "-map", "[outa]"]
            .iter()
            .map(|s| s.to_string()),
    );
    args.extend(encode_args(profile));
    args.push("-f".into());
    args.push("mp4".into());
    args.push(output.to_string_lossy().into_owned());

    let expected_duration_secs = if durations.len() == segments.len() {
        durations.iter().map(|d| d.unwrap_or(0.0)).sum()
    } else {
        0.0
    };

    RenderPlan {
        args,
        output_path: output.to_path_buf(),
        expected_duration_secs,
        segments: segments.len(),
    }
}

/// Segment paths in concat order, for probing durations before planning.
pub fn segment_paths<'a>(source: &'a Path, profile: &'a RenderProfile) -> Vec<&'a Path> {
    [profile.intro.as_deref(), Some(source), profile.outro.as_deref()]
        .into_iter()
        .flatten()
        .collect()
}

fn filter_graph(segments: &[Segment<'_>], profile: &RenderProfile, overlay_input: Option<usize>) -> String {
    let (w, h) = (profile.width, profile.height);
    let normalize = format!("scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},setsar=1");
    let mut graph = Vec::new();
    let mut concat_inputs = String::new();

    for (i, segment) in segments.iter().enumerate() {
        let k = segment.input;
        match (segment.branded, overlay_input, &profile.overlay) {
            (true, Some(wm), Some(overlay)) => {
                graph.push(format!("[{k}:v]{normalize},setpts=PTS-STARTPTS[base{i}]"));
                graph.push(format!("[{wm}:v]scale={}:-1[wm]", overlay.width));
                graph.push(format!(
                    "[base{i}][wm]overlay=W-w-{}:{}:shortest=1,format=yuv420p[v{i}]",
                    overlay.margin_x, overlay.margin_y
                ));
            }
            _ => {
                graph.push(format!(
                    "[{k}:v]{normalize},setpts=PTS-STARTPTS,format=yuv420p[v{i}]"
                ));
            }
        }
        graph.push(format!(
            "[{k}:a]aresample={},asetpts=PTS-STARTPTS[a{i}]",
            profile.audio_sample_rate
        ));
        concat_inputs.push_str(&format!("[v{i}][a{i}]"));
    }
    graph.push(format!(
        "{concat_inputs}concat=n={}:v=1:a=1[outv][outa]",
        segments.len()
    ));
    graph.join(";")
}

/// Encoder arguments shared by branding and reframe renders.
pub fn encode_args(profile: &RenderProfile) -> Vec<String> {
    vec![
        "-c:v".to_string(),
        profile.encoder.clone(),
        "-preset".to_string(),
        profile.preset.clone(),
        "-b:v".to_string(),
        format!("{}k", profile.video_bitrate_kbps.max(500)),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        format!("{}k", profile.audio_bitrate_kbps.max(64)),
        "-ar".to_string(),
        profile.audio_sample_rate.to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
    ]
}
