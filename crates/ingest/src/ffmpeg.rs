//! ffmpeg-backed live source: one connection, one recording, two pipes.
//!
//! A single ffmpeg process reads the stream and writes three outputs:
//! the untouched stream copied to `recording.ts`, grayscale analysis frames
//! on stdout, and mono s16le audio on stderr (hence `-loglevel quiet`).
//! Reader threads turn both pipes into [`MediaPacket`]s. Analysis output
//! never back-pressures the process: packets that find the hand-off queue
//! full are dropped, so the recording keeps flowing.

use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use reelcast_common::config::DetectionConfig;
use reelcast_common::error::{ReelError, ReelResult};
use reelcast_detector::{AudioSample, FrameSample, GrayImage};
use reelcast_job_model::{ClipWindow, RetentionWindow};
use reelcast_render_engine::ffmpeg::{stderr_tail, DIAGNOSTIC_CHARS};

use crate::source::{MediaPacket, MediaSource, RetainedMedia, SourcePoll};

/// File name of the stream-copied recording inside the match directory.
pub const RECORDING_NAME: &str = "recording.ts";

const PACKET_BACKLOG: usize = 256;

/// Muxed data trails the decoded timeline by roughly this much.
const FLUSH_MARGIN_SECS: f64 = 1.0;

/// Stream position shared between the reader threads and the recording.
#[derive(Debug, Default)]
struct Timeline {
    latest_pts_bits: AtomicU64,
    finished: AtomicBool,
}

impl Timeline {
    fn advance(&self, pts: f64) {
        let mut current = self.latest_pts_bits.load(Ordering::Acquire);
        while f64::from_bits(current) < pts {
            match self.latest_pts_bits.compare_exchange_weak(
                current,
                pts.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    fn latest(&self) -> f64 {
        f64::from_bits(self.latest_pts_bits.load(Ordering::Acquire))
    }
}

/// The on-disk recording, exposed as retained media.
pub struct RecordingBuffer {
    path: PathBuf,
    retention_secs: f64,
    timeline: Arc<Timeline>,
    program: String,
}

impl RecordingBuffer {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RetainedMedia for RecordingBuffer {
    fn window(&self) -> RetentionWindow {
        let latest = self.timeline.latest();
        let end = if self.is_finished() {
            latest
        } else {
            (latest - FLUSH_MARGIN_SECS).max(0.0)
        };
        RetentionWindow::new((end - self.retention_secs).max(0.0), end)
    }

    fn is_finished(&self) -> bool {
        self.timeline.finished.load(Ordering::Acquire)
    }

    fn cut(&self, window: &ClipWindow, out: &Path) -> ReelResult<()> {
        let duration = window.duration();
        if duration <= 0.0 {
            return Err(ReelError::extraction("clip window is empty"));
        }
        let output = Command::new(&self.program)
            .args(["-y", "-hide_banner", "-loglevel", "error", "-ss"])
            .arg(format!("{:.3}", window.start))
            .arg("-i")
            .arg(&self.path)
            .arg("-t")
            .arg(format!("{duration:.3}"))
            .args([
                "-map",
                "0:v",
                "-map",
                "0:a?",
                "-c",
                "copy",
                "-avoid_negative_ts",
                "make_zero",
                "-f",
                "mp4",
            ])
            .arg(out)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ReelError::extraction(format!("Failed to start {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ReelError::extraction(format!(
                "clip cut failed (status {}): {}",
                output.status,
                stderr_tail(&stderr, DIAGNOSTIC_CHARS)
            )));
        }
        Ok(())
    }
}

/// Live stream decoded by an ffmpeg child process.
pub struct FfmpegStreamSource {
    uri: String,
    child: Option<Child>,
    packets: Receiver<MediaPacket>,
    readers: Vec<JoinHandle<()>>,
    recording: Arc<RecordingBuffer>,
    timeline: Arc<Timeline>,
    dropped: Arc<AtomicU64>,
}

impl FfmpegStreamSource {
    /// Connect to `uri` and start recording into `match_dir`.
    pub fn spawn(uri: &str, match_dir: &Path, config: &DetectionConfig) -> ReelResult<Self> {
        Self::spawn_with_program("ffmpeg", uri, match_dir, config)
    }

    pub fn spawn_with_program(
        program: &str,
        uri: &str,
        match_dir: &Path,
        config: &DetectionConfig,
    ) -> ReelResult<Self> {
        std::fs::create_dir_all(match_dir)?;
        let recording_path = match_dir.join(RECORDING_NAME);
        let (width, height, fps) = (config.analysis_width, config.analysis_height, config.fps);

        let mut cmd = Command::new(program);
        // Global options must precede the input; stderr carries audio.
        cmd.args(["-y", "-loglevel", "quiet", "-nostats", "-err_detect", "ignore_err", "-i", uri])
            .args(["-map", "0", "-c", "copy", "-f", "mpegts"])
            .arg(&recording_path)
            .args(["-map", "0:v", "-vf"])
            .arg(format!("fps={fps},scale={width}:{height}"))
            .args(["-f", "rawvideo", "-pix_fmt", "gray", "-an", "pipe:1"])
            .args(["-map", "0:a", "-f", "s16le", "-ac", "1", "-ar"])
            .arg(config.audio_sample_rate.to_string())
            .arg("pipe:2")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| ReelError::ingest(format!("Failed to start {program}: {e}")))?;
        tracing::info!(pid = child.id(), uri, recording = %recording_path.display(), "Stream decoder started");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ReelError::ingest("Failed to capture decoder stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ReelError::ingest("Failed to capture decoder stderr"))?;

        let timeline = Arc::new(Timeline::default());
        let dropped = Arc::new(AtomicU64::new(0));
        let (tx, rx) = mpsc::sync_channel(PACKET_BACKLOG);

        let video = {
            let tx = tx.clone();
            let timeline = timeline.clone();
            let dropped = dropped.clone();
            std::thread::spawn(move || {
                read_frames(stdout, width, height, fps, tx, &timeline, &dropped)
            })
        };

        let buffer_samples = config.audio_buffer_samples();
        let sample_rate = config.audio_sample_rate;
        let normalization = config.audio.normalization;
        let audio = {
            let timeline = timeline.clone();
            let dropped = dropped.clone();
            std::thread::spawn(move || {
                read_audio(stderr, buffer_samples, sample_rate, normalization, tx, &timeline, &dropped)
            })
        };

        let recording = Arc::new(RecordingBuffer {
            path: recording_path,
            retention_secs: config.retention_secs,
            timeline: timeline.clone(),
            program: program.to_string(),
        });

        Ok(Self {
            uri: uri.to_string(),
            child: Some(child),
            packets: rx,
            readers: vec![video, audio],
            recording,
            timeline,
            dropped,
        })
    }

    /// Packets dropped because the analysis side fell behind.
    pub fn dropped_packets(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl MediaSource for FfmpegStreamSource {
    fn next_packet(&mut self, timeout: Duration) -> ReelResult<SourcePoll> {
        match self.packets.recv_timeout(timeout) {
            Ok(packet) => Ok(SourcePoll::Packet(packet)),
            Err(RecvTimeoutError::Timeout) => Ok(SourcePoll::Pending),
            Err(RecvTimeoutError::Disconnected) => Ok(SourcePoll::Ended),
        }
    }

    fn retained(&self) -> Arc<dyn RetainedMedia> {
        self.recording.clone()
    }

    fn shutdown(&mut self) -> ReelResult<()> {
        if let Some(mut child) = self.child.take() {
            tracing::info!(pid = child.id(), uri = %self.uri, "Stopping stream decoder");
            let _ = child.kill();
            let _ = child.wait();
        }
        // Unblock readers stuck on a full hand-off queue.
        while self.packets.try_recv().is_ok() {}
        for reader in self.readers.drain(..) {
            let _ = reader.join();
        }
        self.timeline.finished.store(true, Ordering::Release);
        let dropped = self.dropped_packets();
        if dropped > 0 {
            tracing::warn!(dropped, "Analysis dropped packets while behind the stream");
        }
        Ok(())
    }
}

impl Drop for FfmpegStreamSource {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

fn hand_off(tx: &SyncSender<MediaPacket>, packet: MediaPacket, dropped: &AtomicU64) -> bool {
    match tx.try_send(packet) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            dropped.fetch_add(1, Ordering::Relaxed);
            true
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}

fn read_frames(
    stdout: impl Read,
    width: u32,
    height: u32,
    fps: u32,
    tx: SyncSender<MediaPacket>,
    timeline: &Timeline,
    dropped: &AtomicU64,
) {
    let frame_len = width as usize * height as usize;
    let mut reader = BufReader::with_capacity(frame_len * 2, stdout);
    let mut frame_index: u64 = 0;
    loop {
        let mut pixels = vec![0u8; frame_len];
        if reader.read_exact(&mut pixels).is_err() {
            break;
        }
        let pts = frame_index as f64 / fps.max(1) as f64;
        let Some(image) = GrayImage::new(width, height, pixels) else {
            break;
        };
        timeline.advance(pts);
        // Indices keep counting across drops so consumers can see gaps.
        let packet = MediaPacket::Frame(FrameSample::new(pts, frame_index, image));
        frame_index += 1;
        if !hand_off(&tx, packet, dropped) {
            break;
        }
    }
    tracing::debug!(frames = frame_index, "Video pipe closed");
}

fn read_audio(
    stderr: impl Read,
    buffer_samples: usize,
    sample_rate: u32,
    normalization: f64,
    tx: SyncSender<MediaPacket>,
    timeline: &Timeline,
    dropped: &AtomicU64,
) {
    let mut reader = BufReader::new(stderr);
    let mut bytes = vec![0u8; buffer_samples * 2];
    let mut samples_read: u64 = 0;
    loop {
        if reader.read_exact(&mut bytes).is_err() {
            break;
        }
        let pcm: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        let pts = samples_read as f64 / sample_rate.max(1) as f64;
        samples_read += pcm.len() as u64;
        let sample = AudioSample::from_pcm(pts, &pcm, sample_rate, normalization);
        timeline.advance(pts + sample.duration_secs);
        if !hand_off(&tx, MediaPacket::Audio(sample), dropped) {
            break;
        }
    }
    tracing::debug!(samples = samples_read, "Audio pipe closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DetectionConfig {
        DetectionConfig {
            analysis_width: 4,
            analysis_height: 2,
            fps: 10,
            audio_sample_rate: 100,
            audio_buffer_secs: 0.1,
            retention_secs: 5.0,
            ..DetectionConfig::default()
        }
    }

    #[test]
    fn test_frame_reader_splits_raw_video() {
        let raw: Vec<u8> = (0..24u8).collect();
        let (tx, rx) = mpsc::sync_channel(16);
        let timeline = Timeline::default();
        let dropped = AtomicU64::new(0);
        read_frames(&raw[..], 4, 2, 10, tx, &timeline, &dropped);

        let frames: Vec<MediaPacket> = rx.try_iter().collect();
        assert_eq!(frames.len(), 3);
        match &frames[2] {
            MediaPacket::Frame(f) => {
                assert_eq!(f.frame_index, 2);
                assert!((f.pts - 0.2).abs() < 1e-9);
                assert_eq!(f.image.get(0, 0), 16);
            }
            other => panic!("expected frame, got {other:?}"),
        }
        assert!((timeline.latest() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_audio_reader_emits_buffers_with_stream_time() {
        // Two 10-sample buffers at 100 Hz, the second one loud.
        let mut raw = Vec::new();
        for _ in 0..10 {
            raw.extend_from_slice(&0i16.to_le_bytes());
        }
        for _ in 0..10 {
            raw.extend_from_slice(&20000i16.to_le_bytes());
        }
        let (tx, rx) = mpsc::sync_channel(16);
        let timeline = Timeline::default();
        let dropped = AtomicU64::new(0);
        read_audio(&raw[..], 10, 100, 20000.0, tx, &timeline, &dropped);

        let buffers: Vec<AudioSample> = rx
            .try_iter()
            .filter_map(|p| match p {
                MediaPacket::Audio(a) => Some(a),
                _ => None,
            })
            .collect();
        assert_eq!(buffers.len(), 2);
        assert_eq!(buffers[0].energy, 0.0);
        assert!((buffers[1].pts - 0.1).abs() < 1e-9);
        assert!((buffers[1].energy - 1.0).abs() < 1e-9);
        assert!((timeline.latest() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_full_backlog_drops_instead_of_blocking() {
        let raw = vec![0u8; 8 * 5];
        let (tx, rx) = mpsc::sync_channel(2);
        let timeline = Timeline::default();
        let dropped = AtomicU64::new(0);
        read_frames(&raw[..], 4, 2, 10, tx, &timeline, &dropped);
        assert_eq!(rx.try_iter().count(), 2);
        assert_eq!(dropped.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_recording_window_is_bounded_by_retention() {
        let timeline = Arc::new(Timeline::default());
        let buffer = RecordingBuffer {
            path: PathBuf::from("/tmp/recording.ts"),
            retention_secs: config().retention_secs,
            timeline: timeline.clone(),
            program: "ffmpeg".to_string(),
        };
        timeline.advance(12.0);
        let live = buffer.window();
        assert!((live.end - 11.0).abs() < 1e-9);
        assert!((live.start - 6.0).abs() < 1e-9);

        timeline.finished.store(true, Ordering::Release);
        let done = buffer.window();
        assert!((done.end - 12.0).abs() < 1e-9);
        assert!(buffer.is_finished());
    }

    #[test]
    fn test_timeline_never_moves_backwards() {
        let timeline = Timeline::default();
        timeline.advance(5.0);
        timeline.advance(3.0);
        assert_eq!(timeline.latest(), 5.0);
    }
}
