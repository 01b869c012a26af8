//! Application configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ReelError, ReelResult};

/// Environment variable that points at an explicit config file.
pub const CONFIG_ENV: &str = "REELCAST_CONFIG";

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// On-disk layout of matches, queue, outputs, and registry.
    pub paths: PathsConfig,

    /// Live detection settings.
    pub detection: DetectionConfig,

    /// Branding render settings.
    pub render: RenderConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Directory layout. Every directory is created lazily by its owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Per-match recordings and extracted clips.
    pub matches_dir: PathBuf,

    /// Durable job queue root.
    pub queue_dir: PathBuf,

    /// Output store for finished renders.
    pub output_dir: PathBuf,

    /// Resource/session registry.
    pub registry_dir: PathBuf,

    /// Intro/outro assets.
    pub assets_dir: PathBuf,

    /// Watermark images.
    pub logos_dir: PathBuf,
}

/// Pre/post roll applied around an event anchored by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RollConfig {
    /// Seconds kept before the event.
    pub pre_roll_secs: f64,

    /// Seconds kept after the event.
    pub post_roll_secs: f64,
}

/// Normalized region of interest inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoiConfig {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

/// Text-cue (scorebar OCR) channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextCueConfig {
    pub enabled: bool,

    /// Sampling period in seconds.
    pub interval_secs: f64,

    /// Keywords that fire the channel. Purely numeric keywords must match a whole token.
    pub keywords: Vec<String>,

    /// Scorebar location.
    pub roi: RoiConfig,

    /// Luma threshold used to binarize the ROI before recognition.
    pub binarize_threshold: u8,

    /// Recognizer backend: "tesseract" or "disabled".
    pub recognizer: String,

    pub roll: RollConfig,
}

/// Audio-sustain (crowd noise) channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSustainConfig {
    pub enabled: bool,

    /// Normalized RMS energy threshold in `[0.0, 1.0]`.
    pub threshold: f64,

    /// Energy must stay at or above the threshold for this long.
    pub sustain_secs: f64,

    /// RMS value (in s16 units) that maps to energy 1.0.
    pub normalization: f64,

    pub roll: RollConfig,
}

/// Motion-spike channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionSpikeConfig {
    pub enabled: bool,

    /// Mean absolute luma delta (0-255 scale) that counts as a spike.
    pub threshold: f64,

    /// Downsample factor applied in both axes before differencing.
    pub downsample: u32,

    pub roll: RollConfig,
}

/// Live detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Width of decoded analysis frames.
    pub analysis_width: u32,

    /// Height of decoded analysis frames.
    pub analysis_height: u32,

    /// Analysis frame rate.
    pub fps: u32,

    /// Audio sample rate of the analysis feed.
    pub audio_sample_rate: u32,

    /// Length of one audio buffer in seconds.
    pub audio_buffer_secs: f64,

    pub text_cue: TextCueConfig,
    pub audio: AudioSustainConfig,
    pub motion: MotionSpikeConfig,

    /// Cooldown after an emitted event during which further fires are suppressed.
    pub cooldown_secs: f64,

    /// A channel silent for more than `stall_factor` x its period is stalled.
    pub stall_factor: f64,

    /// How often channel health is evaluated.
    pub health_check_secs: f64,

    /// How much recent media stays addressable for extraction.
    pub retention_secs: f64,

    /// No packet from the source for this long ends the session.
    pub stall_timeout_secs: f64,

    /// Extra wait beyond post-roll for the buffer to catch up.
    pub extract_grace_secs: f64,

    /// Produce a vertical reel variant for every standard clip.
    pub reel_variant: bool,

    /// Pause between watchdog restarts.
    pub restart_cooldown_secs: f64,
}

/// Branding render configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub standard_width: u32,
    pub standard_height: u32,
    pub vertical_width: u32,
    pub vertical_height: u32,

    /// Video encoder passed to ffmpeg.
    pub encoder: String,

    /// Encoder preset.
    pub preset: String,

    /// Whether the encoder occupies a hardware slot.
    pub hardware: bool,

    /// Optional `-hwaccel` decode method.
    pub hwaccel: Option<String>,

    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
    pub audio_sample_rate: u32,

    /// Number of physical encoder sessions available.
    pub encoder_slots: u32,

    /// How long to wait for a free encoder slot.
    pub lease_wait_secs: f64,

    /// Idle poll interval of the render worker.
    pub poll_interval_secs: f64,

    /// Backoff after a queue-level error.
    pub error_backoff_secs: f64,

    /// Intro asset file name inside the assets directory.
    pub intro_name: String,

    /// Outro asset file name inside the assets directory.
    pub outro_name: String,

    /// Watermark applied to detected clips (file name in the logos directory).
    pub auto_watermark: Option<String>,

    /// Prepend the intro to detected clips.
    pub auto_intro: bool,

    /// Append the outro to detected clips.
    pub auto_outro: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "reelcast=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self::under(default_data_root())
    }
}

impl PathsConfig {
    /// Standard layout rooted at `root`.
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            matches_dir: root.join("matches"),
            queue_dir: root.join("queue"),
            output_dir: root.join("branded_output"),
            registry_dir: root.join("active_sessions"),
            assets_dir: root.join("assets"),
            logos_dir: root.join("logos"),
        }
    }
}

impl RollConfig {
    pub fn new(pre_roll_secs: f64, post_roll_secs: f64) -> Self {
        Self {
            pre_roll_secs,
            post_roll_secs,
        }
    }
}

impl Default for RollConfig {
    fn default() -> Self {
        Self::new(6.0, 12.0)
    }
}

impl Default for TextCueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 0.4,
            keywords: [
                "4", "6", "OUT", "WICKET", "APPEAL", "REVIEW", "BOWLED", "CAUGHT", "CENTURY",
            ]
            .iter()
            .map(|k| k.to_string())
            .collect(),
            roi: RoiConfig {
                x0: 0.15,
                y0: 0.75,
                x1: 0.85,
                y1: 1.0,
            },
            binarize_threshold: 130,
            recognizer: "tesseract".to_string(),
            roll: RollConfig::default(),
        }
    }
}

impl Default for AudioSustainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.65,
            sustain_secs: 0.3,
            normalization: 20_000.0,
            roll: RollConfig::default(),
        }
    }
}

impl Default for MotionSpikeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 20.0,
            downsample: 4,
            roll: RollConfig::default(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            analysis_width: 960,
            analysis_height: 540,
            fps: 25,
            audio_sample_rate: 44_100,
            audio_buffer_secs: 0.1,
            text_cue: TextCueConfig::default(),
            audio: AudioSustainConfig::default(),
            motion: MotionSpikeConfig::default(),
            cooldown_secs: 8.0,
            stall_factor: 3.0,
            health_check_secs: 1.0,
            retention_secs: 120.0,
            stall_timeout_secs: 10.0,
            extract_grace_secs: 15.0,
            reel_variant: true,
            restart_cooldown_secs: 2.0,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            standard_width: 1920,
            standard_height: 1080,
            vertical_width: 1080,
            vertical_height: 1920,
            encoder: "h264_nvenc".to_string(),
            preset: "p1".to_string(),
            hardware: true,
            hwaccel: Some("cuda".to_string()),
            video_bitrate_kbps: 8000,
            audio_bitrate_kbps: 128,
            audio_sample_rate: 48_000,
            encoder_slots: 1,
            lease_wait_secs: 30.0,
            poll_interval_secs: 1.0,
            error_backoff_secs: 5.0,
            intro_name: "intro.mp4".to_string(),
            outro_name: "outro.mp4".to_string(),
            auto_watermark: None,
            auto_intro: false,
            auto_outro: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl DetectionConfig {
    /// Audio samples per analysis buffer.
    pub fn audio_buffer_samples(&self) -> usize {
        ((self.audio_sample_rate as f64) * self.audio_buffer_secs).round().max(1.0) as usize
    }

    /// Reject settings that would make the channels meaningless.
    pub fn validate(&self) -> ReelResult<()> {
        if self.fps == 0 || self.analysis_width == 0 || self.analysis_height == 0 {
            return Err(ReelError::config("analysis fps and resolution must be non-zero"));
        }
        if self.cooldown_secs < 0.0 {
            return Err(ReelError::config("cooldown_secs must be >= 0"));
        }
        for (name, roll) in [
            ("text_cue", self.text_cue.roll),
            ("audio", self.audio.roll),
            ("motion", self.motion.roll),
        ] {
            if roll.pre_roll_secs < 0.0 || roll.post_roll_secs < 0.0 {
                return Err(ReelError::config(format!(
                    "{name} pre/post roll must be >= 0"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.audio.threshold) {
            return Err(ReelError::config("audio threshold must be within [0, 1]"));
        }
        let roi = self.text_cue.roi;
        if !(0.0 <= roi.x0 && roi.x0 < roi.x1 && roi.x1 <= 1.0)
            || !(0.0 <= roi.y0 && roi.y0 < roi.y1 && roi.y1 <= 1.0)
        {
            return Err(ReelError::config("text cue ROI must be a non-empty normalized rect"));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to load config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Load config from an explicit file. Missing sections take defaults.
    pub fn load_from(path: impl AsRef<Path>) -> ReelResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        config.detection.validate()?;
        Ok(config)
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    if let Ok(explicit) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(explicit);
    }
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("reelcast").join("config.json")
}

/// Default data root.
fn default_data_root() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("reelcast")
}
