//! Detection sessions driven by a scripted source.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reelcast_common::config::{AppConfig, PathsConfig, RollConfig};
use reelcast_common::error::ReelResult;
use reelcast_detector::recognizer::DisabledRecognizer;
use reelcast_detector::AudioSample;
use reelcast_durable::{FileJobQueue, LeaseRegistry};
use reelcast_ingest::{
    DetectionSession, MediaPacket, MediaSource, RetainedMedia, SessionDeps, SourcePoll,
};
use reelcast_job_model::{ChannelId, ClipWindow, JobKind, JobStatus, Orientation, RetentionWindow, StreamHandle};

#[derive(Default)]
struct FakeRetained {
    latest: Mutex<f64>,
    finished: AtomicBool,
    cuts: Mutex<Vec<ClipWindow>>,
}

impl RetainedMedia for FakeRetained {
    fn window(&self) -> RetentionWindow {
        RetentionWindow::new(0.0, *self.latest.lock().unwrap())
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn cut(&self, window: &ClipWindow, out: &Path) -> ReelResult<()> {
        self.cuts.lock().unwrap().push(*window);
        std::fs::write(out, b"clip")?;
        Ok(())
    }
}

enum Tail {
    /// Report end of stream.
    End,
    /// Go quiet forever.
    Silence,
}

struct ScriptedSource {
    packets: VecDeque<MediaPacket>,
    tail: Tail,
    retained: Arc<FakeRetained>,
}

impl ScriptedSource {
    fn new(packets: Vec<MediaPacket>, tail: Tail) -> (Self, Arc<FakeRetained>) {
        let retained = Arc::new(FakeRetained::default());
        let source = Self {
            packets: packets.into(),
            tail,
            retained: retained.clone(),
        };
        (source, retained)
    }
}

impl MediaSource for ScriptedSource {
    fn next_packet(&mut self, timeout: Duration) -> ReelResult<SourcePoll> {
        if let Some(packet) = self.packets.pop_front() {
            let mut latest = self.retained.latest.lock().unwrap();
            *latest = latest.max(packet.pts() + 0.1);
            return Ok(SourcePoll::Packet(packet));
        }
        match self.tail {
            Tail::End => {
                self.retained.finished.store(true, Ordering::SeqCst);
                Ok(SourcePoll::Ended)
            }
            Tail::Silence => {
                std::thread::sleep(timeout);
                Ok(SourcePoll::Pending)
            }
        }
    }

    fn retained(&self) -> Arc<dyn RetainedMedia> {
        self.retained.clone()
    }

    fn shutdown(&mut self) -> ReelResult<()> {
        self.retained.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// 12 s of 100 ms audio buffers, loud from 5.0 s to 5.5 s.
fn crowd_roar() -> Vec<MediaPacket> {
    (0..120)
        .map(|i| {
            let level = if (50..55).contains(&i) { 25_000 } else { 0 };
            let pcm = vec![level as i16; 100];
            MediaPacket::Audio(AudioSample::from_pcm(i as f64 * 0.1, &pcm, 1000, 20_000.0))
        })
        .collect()
}

struct Fixture {
    _dir: tempfile::TempDir,
    config: AppConfig,
    queue: FileJobQueue,
    registry: LeaseRegistry,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.paths = PathsConfig::under(dir.path());
        config.detection.text_cue.enabled = false;
        config.detection.motion.enabled = false;
        config.detection.audio.roll = RollConfig::new(2.0, 3.0);
        config.detection.reel_variant = false;
        config.detection.extract_grace_secs = 1.0;
        let queue = FileJobQueue::open(&config.paths.queue_dir).unwrap();
        let registry = LeaseRegistry::open(&config.paths.registry_dir, 1).unwrap();
        Self {
            _dir: dir,
            config,
            queue,
            registry,
        }
    }

    fn deps(&self) -> SessionDeps {
        SessionDeps {
            config: self.config.clone(),
            queue: self.queue.clone(),
            registry: self.registry.clone(),
            recognizer: Box::new(DisabledRecognizer),
            reframer: None,
        }
    }
}

fn handle(stream_id: &str) -> StreamHandle {
    StreamHandle::new(stream_id, "srt://203.0.113.7:7001", Orientation::Standard)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sustained_roar_becomes_one_queued_clip() {
    let fx = Fixture::new();
    let (source, retained) = ScriptedSource::new(crowd_roar(), Tail::End);

    let session = DetectionSession::start(handle("final"), Box::new(source), fx.deps())
        .await
        .unwrap();
    let summary = tokio::time::timeout(Duration::from_secs(10), session.wait())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(summary.audio_buffers, 120);
    assert_eq!(summary.events, 1);
    assert_eq!(summary.clips, 1);
    assert_eq!(summary.extraction_failures, 0);

    let cuts = retained.cuts.lock().unwrap().clone();
    assert_eq!(cuts.len(), 1);
    assert!((cuts[0].start - 3.2).abs() < 1e-6);
    assert!((cuts[0].end - 8.2).abs() < 1e-6);
    assert!(!cuts[0].partial);

    let pending = fx.queue.list(JobStatus::Pending).unwrap();
    assert_eq!(pending.len(), 1);
    let job = &pending[0];
    assert_eq!(job.kind, JobKind::Detected);
    assert_eq!(job.group, "final");
    assert_eq!(job.origin.as_ref().unwrap().trigger_channel, ChannelId::AudioSustain);
    assert!(job.source_clip_path.exists());
    assert!(job
        .source_clip_path
        .starts_with(fx.config.paths.matches_dir.join("final").join("Full Screen")));
    let name = job.source_clip_path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("ball_") && name.ends_with("_audio_sustain.mp4"), "{name}");

    assert!(fx.registry.sessions().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_quiet_stream_emits_nothing() {
    let fx = Fixture::new();
    let quiet: Vec<MediaPacket> = (0..30)
        .map(|i| MediaPacket::Audio(AudioSample::from_pcm(i as f64 * 0.1, &[0; 100], 1000, 20_000.0)))
        .collect();
    let (source, retained) = ScriptedSource::new(quiet, Tail::End);

    let session = DetectionSession::start(handle("quiet"), Box::new(source), fx.deps())
        .await
        .unwrap();
    let summary = session.wait().await.unwrap();
    assert_eq!(summary.events, 0);
    assert_eq!(summary.signals, 30);
    assert!(retained.cuts.lock().unwrap().is_empty());
    assert_eq!(fx.queue.depth().unwrap().pending, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stalled_source_ends_session_with_error() {
    let mut fx = Fixture::new();
    fx.config.detection.stall_timeout_secs = 0.3;
    let (source, _) = ScriptedSource::new(crowd_roar().into_iter().take(5).collect(), Tail::Silence);

    let session = DetectionSession::start(handle("stall"), Box::new(source), fx.deps())
        .await
        .unwrap();
    let err = tokio::time::timeout(Duration::from_secs(10), session.wait())
        .await
        .unwrap()
        .unwrap_err();
    assert!(err.to_string().contains("stalled"), "{err}");
    assert!(fx.registry.sessions().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_tears_down_and_frees_stream() {
    let mut fx = Fixture::new();
    fx.config.detection.stall_timeout_secs = 30.0;
    let (source, retained) = ScriptedSource::new(Vec::new(), Tail::Silence);

    let session = DetectionSession::start(handle("live"), Box::new(source), fx.deps())
        .await
        .unwrap();
    assert_eq!(fx.registry.sessions().unwrap().len(), 1);

    // Same stream cannot be watched twice.
    let (second, _) = ScriptedSource::new(Vec::new(), Tail::Silence);
    assert!(DetectionSession::start(handle("live"), Box::new(second), fx.deps())
        .await
        .is_err());

    tokio::time::sleep(Duration::from_millis(200)).await;
    let summary = tokio::time::timeout(Duration::from_secs(5), session.stop())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.events, 0);
    assert!(retained.is_finished());
    assert!(fx.registry.sessions().unwrap().is_empty());
}
