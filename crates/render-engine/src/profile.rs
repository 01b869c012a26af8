//! Render profile resolution: target geometry, overlay placement, assets.

use std::path::{Path, PathBuf};

use reelcast_common::config::{PathsConfig, RenderConfig};
use reelcast_common::error::{ReelError, ReelResult};
use reelcast_job_model::{Job, Orientation};

/// Watermark width as a fraction of the target width.
pub const STANDARD_OVERLAY_SCALE: f64 = 0.15;
pub const VERTICAL_OVERLAY_SCALE: f64 = 0.25;

/// Reference margins (x, y) and the frame size they were tuned on.
const STANDARD_MARGIN: (f64, f64, f64, f64) = (40.0, 40.0, 1920.0, 1080.0);
const VERTICAL_MARGIN: (f64, f64, f64, f64) = (20.0, 60.0, 1080.0, 1920.0);

/// Suffix inserted before the extension for vertical asset variants.
pub const VERTICAL_ASSET_SUFFIX: &str = "_vertical";

/// A watermark resolved to a file and a top-right placement.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlaySpec {
    pub path: PathBuf,

    /// Scaled watermark width in pixels; height follows the aspect ratio.
    pub width: u32,

    pub margin_x: u32,
    pub margin_y: u32,
}

/// Everything needed to render one job, resolved from the job and config.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderProfile {
    pub orientation: Orientation,
    pub width: u32,
    pub height: u32,
    pub overlay: Option<OverlaySpec>,
    pub intro: Option<PathBuf>,
    pub outro: Option<PathBuf>,
    pub encoder: String,
    pub preset: String,
    pub hwaccel: Option<String>,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
    pub audio_sample_rate: u32,
}

impl RenderProfile {
    /// Resolve the profile for `job`.
    ///
    /// Missing intro, outro, or watermark files are skipped with a warning;
    /// a watermark name that is not a plain file name is rejected.
    pub fn resolve(job: &Job, config: &RenderConfig, paths: &PathsConfig) -> ReelResult<Self> {
        let orientation = job.orientation;
        let (width, height) = match orientation {
            Orientation::Standard => (config.standard_width, config.standard_height),
            Orientation::Vertical => (config.vertical_width, config.vertical_height),
        };
        if width == 0 || height == 0 {
            return Err(ReelError::config(format!(
                "{} target resolution must be non-zero",
                orientation.as_str()
            )));
        }

        let branding = &job.branding_profile;
        let overlay = match &branding.watermark {
            Some(name) => {
                let base = paths.logos_dir.join(plain_file_name(name)?);
                match select_asset(&base, orientation) {
                    Some(path) => Some(overlay_spec(path, orientation, width, height)),
                    None => {
                        tracing::warn!(
                            job_id = %job.job_id,
                            watermark = %base.display(),
                            "Watermark not found, rendering without it"
                        );
                        None
                    }
                }
            }
            None => None,
        };

        let intro = if branding.intro {
            optional_asset(&paths.assets_dir.join(&config.intro_name), orientation, &job.job_id)
        } else {
            None
        };
        let outro = if branding.outro {
            optional_asset(&paths.assets_dir.join(&config.outro_name), orientation, &job.job_id)
        } else {
            None
        };

        Ok(Self {
            orientation,
            width,
            height,
            overlay,
            intro,
            outro,
            encoder: config.encoder.clone(),
            preset: config.preset.clone(),
            hwaccel: config.hwaccel.clone().filter(|h| !h.is_empty()),
            video_bitrate_kbps: config.video_bitrate_kbps,
            audio_bitrate_kbps: config.audio_bitrate_kbps,
            audio_sample_rate: config.audio_sample_rate,
        })
    }

    /// Whether rendering changes anything beyond normalizing the clip.
    pub fn is_branded(&self) -> bool {
        self.overlay.is_some() || self.intro.is_some() || self.outro.is_some()
    }
}

/// Place a watermark at the top-right corner for the given target size.
pub fn overlay_spec(path: PathBuf, orientation: Orientation, width: u32, height: u32) -> OverlaySpec {
    let (scale, (mx, my, ref_w, ref_h)) = match orientation {
        Orientation::Standard => (STANDARD_OVERLAY_SCALE, STANDARD_MARGIN),
        Orientation::Vertical => (VERTICAL_OVERLAY_SCALE, VERTICAL_MARGIN),
    };
    OverlaySpec {
        path,
        width: ((width as f64 * scale).round() as u32).max(1),
        margin_x: (mx * width as f64 / ref_w).round() as u32,
        margin_y: (my * height as f64 / ref_h).round() as u32,
    }
}

/// `<dir>/<stem>_vertical<.ext>` for `<dir>/<stem><.ext>`.
pub fn vertical_variant(base: &Path) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match base.extension() {
        Some(ext) => format!("{stem}{VERTICAL_ASSET_SUFFIX}.{}", ext.to_string_lossy()),
        None => format!("{stem}{VERTICAL_ASSET_SUFFIX}"),
    };
    base.with_file_name(name)
}

/// Pick the asset to use for `orientation`: vertical jobs prefer the
/// `_vertical` variant and fall back to the base file. `None` if neither exists.
pub fn select_asset(base: &Path, orientation: Orientation) -> Option<PathBuf> {
    if orientation.is_vertical() {
        let variant = vertical_variant(base);
        if variant.is_file() {
            return Some(variant);
        }
    }
    base.is_file().then(|| base.to_path_buf())
}

fn optional_asset(base: &Path, orientation: Orientation, job_id: &str) -> Option<PathBuf> {
    let found = select_asset(base, orientation);
    if found.is_none() {
        tracing::warn!(job_id, asset = %base.display(), "Branding asset missing, skipping");
    }
    found
}

fn plain_file_name(name: &str) -> ReelResult<&str> {
    let ok = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\');
    if ok {
        Ok(name)
    } else {
        Err(ReelError::render(format!("invalid watermark name {name:?}")))
    }
}
