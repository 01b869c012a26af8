//! Live detection session management.
//!
//! A session owns one source and runs, as separate tasks:
//! - a reader pulling packets off the source (stall watchdog included)
//! - one task per trigger channel, frames fanned out over a broadcast
//! - a fusion loop that debounces signals, tracks channel health, and
//!   spawns clip extractions
//!
//! Stopping is a full teardown: the source is shut down, channels drain,
//! and in-flight extractions finish before `stop` returns.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

use reelcast_common::clock::StreamClock;
use reelcast_common::config::AppConfig;
use reelcast_common::error::{ReelError, ReelResult};
use reelcast_common::process::current_pid;
use reelcast_detector::recognizer::TextRecognizer;
use reelcast_detector::{
    AudioChannel, AudioSample, AudioSustainChannel, ChannelHealth, EventFusion, FrameChannel,
    FrameSample, HealthEvent, MotionSpikeChannel, SessionHealth, TextCueChannel, TriggerChannel,
};
use reelcast_durable::{FileJobQueue, LeaseRegistry, SessionGuard};
use reelcast_job_model::{SessionRecord, StreamHandle, TriggerSignal};
use reelcast_render_engine::RenderBackend;

use crate::extractor::{ClipExtractor, ExtractedClip};
use crate::source::{MediaPacket, MediaSource, SourcePoll};

const FRAME_BACKLOG: usize = 32;
const AUDIO_BACKLOG: usize = 256;
const READ_POLL: Duration = Duration::from_millis(100);
/// Floor for stall thresholds so fast channels are not flagged by jitter.
const MIN_STALL_THRESHOLD: Duration = Duration::from_secs(1);

/// State of a detection session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Detecting.
    Running,
    /// Source ended or stop requested; tearing down.
    Stopping,
    /// Torn down cleanly.
    Stopped,
    /// Torn down after a source failure.
    Error,
}

/// Everything a session needs besides its source.
pub struct SessionDeps {
    pub config: AppConfig,
    pub queue: FileJobQueue,
    pub registry: LeaseRegistry,
    pub recognizer: Box<dyn TextRecognizer>,
    /// Backend for reel reframes; `None` uses ffmpeg.
    pub reframer: Option<Box<dyn RenderBackend>>,
}

/// What a finished session did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSummary {
    pub stream_id: String,
    pub frames: u64,
    pub audio_buffers: u64,
    pub signals: u64,
    pub events: u64,
    pub suppressed: u64,
    pub clips: usize,
    pub extraction_failures: usize,
    pub duration_secs: f64,
}

#[derive(Debug, Default)]
struct IngestCounters {
    frames: AtomicU64,
    audio_buffers: AtomicU64,
    audio_dropped: AtomicU64,
}

#[derive(Debug, Default)]
struct FusionOutcome {
    signals: u64,
    events: u64,
    suppressed: u64,
    clips: Vec<ExtractedClip>,
    failures: usize,
}

/// A running detection session for one stream.
pub struct DetectionSession {
    handle: StreamHandle,
    state: SessionState,
    stop_flag: Arc<AtomicBool>,
    health_rx: watch::Receiver<SessionHealth>,
    counters: Arc<IngestCounters>,
    reader_task: Option<JoinHandle<ReelResult<()>>>,
    channel_tasks: Vec<JoinHandle<()>>,
    fusion_task: Option<JoinHandle<FusionOutcome>>,
    session_guard: Option<SessionGuard>,
    started: Instant,
}

impl DetectionSession {
    /// Register the session and start every task.
    ///
    /// Fails if another live process already runs a session for this stream.
    pub async fn start(
        handle: StreamHandle,
        source: Box<dyn MediaSource>,
        deps: SessionDeps,
    ) -> ReelResult<Self> {
        let SessionDeps {
            config,
            queue,
            registry,
            recognizer,
            reframer,
        } = deps;
        config.detection.validate()?;
        let detection = &config.detection;

        tracing::info!(
            stream_id = %handle.stream_id,
            uri = %handle.uri,
            orientation = handle.orientation.as_str(),
            "Starting detection session"
        );

        let session_guard = registry.register_session(SessionRecord {
            stream_id: handle.stream_id.clone(),
            uri: handle.uri.clone(),
            orientation: handle.orientation,
            owner_pid: current_pid(),
            owner_token: String::new(),
            started_at: handle.started_at,
        })?;

        let clock = StreamClock::start();
        let match_dir = config.paths.matches_dir.join(&handle.stream_id);
        let mut extractor = ClipExtractor::new(
            match_dir,
            detection,
            &config.render,
            queue,
            registry,
            source.retained(),
        )
        .with_clock(clock)
        .with_session_id(format!("detect-{}", handle.stream_id));
        if let Some(backend) = reframer {
            extractor = extractor.with_reframer(backend);
        }
        let extractor = Arc::new(extractor);

        let stop_flag = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(IngestCounters::default());
        let (frame_tx, _) = broadcast::channel::<FrameSample>(FRAME_BACKLOG);
        let (audio_tx, mut audio_rx) = mpsc::channel::<AudioSample>(AUDIO_BACKLOG);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel::<TriggerSignal>();

        let mut fusion = EventFusion::new(
            handle.stream_id.clone(),
            handle.orientation,
            detection.cooldown_secs,
        );
        let mut health = ChannelHealth::new(detection.stall_factor, MIN_STALL_THRESHOLD);
        let now = Instant::now();
        let mut channel_tasks = Vec::new();

        let mut frame_channels: Vec<(Box<dyn FrameChannel>, bool)> = Vec::new();
        if detection.text_cue.enabled {
            frame_channels.push((
                Box::new(TextCueChannel::new(detection.text_cue.clone(), recognizer)),
                false,
            ));
        }
        if detection.motion.enabled {
            // Motion compares neighbouring frames, so a lag must drop history.
            frame_channels.push((
                Box::new(MotionSpikeChannel::new(detection.motion.clone(), detection.fps)),
                true,
            ));
        }
        for (channel, reset_on_lag) in frame_channels {
            fusion = fusion.with_roll(channel.id(), channel.roll());
            health.register(channel.id(), channel.expected_period_secs(), now);
            let rx = frame_tx.subscribe();
            let tx = signal_tx.clone();
            channel_tasks.push(tokio::task::spawn_blocking(move || {
                run_frame_channel(channel, rx, tx, reset_on_lag)
            }));
        }

        if detection.audio.enabled {
            let mut channel =
                AudioSustainChannel::new(detection.audio.clone(), detection.audio_buffer_secs);
            fusion = fusion.with_roll(channel.id(), channel.roll());
            health.register(channel.id(), channel.expected_period_secs(), now);
            let tx = signal_tx.clone();
            channel_tasks.push(tokio::spawn(async move {
                while let Some(sample) = audio_rx.recv().await {
                    if tx.send(channel.on_audio(&sample)).is_err() {
                        break;
                    }
                }
            }));
        } else {
            drop(audio_rx);
        }
        drop(signal_tx);

        let (health_tx, health_rx) = watch::channel(health.snapshot());
        let health_every = Duration::from_secs_f64(detection.health_check_secs.max(0.1));
        let fusion_task = tokio::spawn(run_fusion(
            fusion,
            health,
            health_tx,
            health_every,
            signal_rx,
            extractor,
        ));

        let stall_timeout = Duration::from_secs_f64(detection.stall_timeout_secs.max(0.1));
        let reader_task = {
            let stop = stop_flag.clone();
            let counters = counters.clone();
            tokio::task::spawn_blocking(move || {
                run_reader(source, frame_tx, audio_tx, stop, stall_timeout, &counters)
            })
        };

        tracing::info!(stream_id = %handle.stream_id, channels = channel_tasks.len(), "Detection session started");

        Ok(Self {
            handle,
            state: SessionState::Running,
            stop_flag,
            health_rx,
            counters,
            reader_task: Some(reader_task),
            channel_tasks,
            fusion_task: Some(fusion_task),
            session_guard: Some(session_guard),
            started: Instant::now(),
        })
    }

    pub fn handle(&self) -> &StreamHandle {
        &self.handle
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Live channel health; updated on every health check.
    pub fn health(&self) -> watch::Receiver<SessionHealth> {
        self.health_rx.clone()
    }

    /// Flag that ends the session when set, e.g. from a signal handler.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop_flag.clone()
    }

    /// Whether the source has stopped producing (ended, failed, or stopped).
    pub fn is_finished(&self) -> bool {
        self.reader_task
            .as_ref()
            .map(|t| t.is_finished())
            .unwrap_or(true)
    }

    /// Request a stop and wait for the full teardown.
    pub async fn stop(mut self) -> ReelResult<SessionSummary> {
        tracing::info!(stream_id = %self.handle.stream_id, "Stopping detection session");
        self.stop_flag.store(true, Ordering::SeqCst);
        self.finish().await
    }

    /// Run until the source ends, fails, or the stop flag is set, then tear
    /// down. A stalled or broken source is returned as an error, after the
    /// pending extractions have completed.
    pub async fn wait(mut self) -> ReelResult<SessionSummary> {
        self.finish().await
    }

    async fn finish(&mut self) -> ReelResult<SessionSummary> {
        let reader_result = match self.reader_task.take() {
            Some(task) => task
                .await
                .unwrap_or_else(|e| Err(ReelError::ingest(format!("reader task failed: {e}")))),
            None => Ok(()),
        };
        self.state = SessionState::Stopping;

        for task in self.channel_tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Channel task failed");
            }
        }
        let outcome = match self.fusion_task.take() {
            Some(task) => task.await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Fusion task failed");
                FusionOutcome::default()
            }),
            None => FusionOutcome::default(),
        };

        if let Some(guard) = self.session_guard.take() {
            if let Err(e) = guard.release() {
                tracing::warn!(error = %e, "Failed to release session record");
            }
        }

        let summary = SessionSummary {
            stream_id: self.handle.stream_id.clone(),
            frames: self.counters.frames.load(Ordering::Relaxed),
            audio_buffers: self.counters.audio_buffers.load(Ordering::Relaxed),
            signals: outcome.signals,
            events: outcome.events,
            suppressed: outcome.suppressed,
            clips: outcome.clips.len(),
            extraction_failures: outcome.failures,
            duration_secs: self.started.elapsed().as_secs_f64(),
        };
        let audio_dropped = self.counters.audio_dropped.load(Ordering::Relaxed);
        tracing::info!(
            stream_id = %summary.stream_id,
            frames = summary.frames,
            events = summary.events,
            clips = summary.clips,
            extraction_failures = summary.extraction_failures,
            audio_dropped,
            duration_secs = summary.duration_secs,
            "Detection session stopped"
        );

        match reader_result {
            Ok(()) => {
                self.state = SessionState::Stopped;
                Ok(summary)
            }
            Err(e) => {
                self.state = SessionState::Error;
                Err(e)
            }
        }
    }
}

impl Drop for DetectionSession {
    fn drop(&mut self) {
        // Dropping without stop/wait still ends the reader.
        self.stop_flag.store(true, Ordering::SeqCst);
    }
}

fn run_reader(
    mut source: Box<dyn MediaSource>,
    frame_tx: broadcast::Sender<FrameSample>,
    audio_tx: mpsc::Sender<AudioSample>,
    stop: Arc<AtomicBool>,
    stall_timeout: Duration,
    counters: &IngestCounters,
) -> ReelResult<()> {
    let result = pump(source.as_mut(), &frame_tx, &audio_tx, &stop, stall_timeout, counters);
    if let Err(e) = source.shutdown() {
        tracing::warn!(error = %e, "Source shutdown failed");
    }
    result
}

fn pump(
    source: &mut dyn MediaSource,
    frame_tx: &broadcast::Sender<FrameSample>,
    audio_tx: &mpsc::Sender<AudioSample>,
    stop: &AtomicBool,
    stall_timeout: Duration,
    counters: &IngestCounters,
) -> ReelResult<()> {
    let mut last_packet = Instant::now();
    loop {
        if stop.load(Ordering::SeqCst) {
            tracing::info!("Stop requested, closing source");
            return Ok(());
        }
        match source.next_packet(READ_POLL)? {
            SourcePoll::Packet(MediaPacket::Frame(frame)) => {
                last_packet = Instant::now();
                counters.frames.fetch_add(1, Ordering::Relaxed);
                // No receivers only means no frame channel is enabled.
                let _ = frame_tx.send(frame);
            }
            SourcePoll::Packet(MediaPacket::Audio(sample)) => {
                last_packet = Instant::now();
                counters.audio_buffers.fetch_add(1, Ordering::Relaxed);
                if let Err(mpsc::error::TrySendError::Full(_)) = audio_tx.try_send(sample) {
                    counters.audio_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            SourcePoll::Pending => {
                let silent = last_packet.elapsed();
                if silent > stall_timeout {
                    tracing::warn!(silent_secs = silent.as_secs_f64(), "No data from source");
                    return Err(ReelError::ingest(format!(
                        "stream stalled: no data for {:.1}s",
                        silent.as_secs_f64()
                    )));
                }
            }
            SourcePoll::Ended => {
                tracing::info!("Source ended");
                return Ok(());
            }
        }
    }
}

fn run_frame_channel(
    mut channel: Box<dyn FrameChannel>,
    mut rx: broadcast::Receiver<FrameSample>,
    tx: mpsc::UnboundedSender<TriggerSignal>,
    reset_on_lag: bool,
) {
    let id = channel.id();
    let mut skipped: u64 = 0;
    loop {
        match rx.blocking_recv() {
            Ok(frame) => {
                if let Some(signal) = channel.on_frame(&frame) {
                    if tx.send(signal).is_err() {
                        break;
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                skipped += n;
                if reset_on_lag {
                    channel.reset();
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    if skipped > 0 {
        tracing::debug!(channel = id.as_str(), skipped, "Channel skipped frames while busy");
    }
}

async fn run_fusion(
    mut fusion: EventFusion,
    mut health: ChannelHealth,
    health_tx: watch::Sender<SessionHealth>,
    health_every: Duration,
    mut signal_rx: mpsc::UnboundedReceiver<TriggerSignal>,
    extractor: Arc<ClipExtractor>,
) -> FusionOutcome {
    let mut outcome = FusionOutcome::default();
    let mut extractions: JoinSet<ReelResult<ExtractedClip>> = JoinSet::new();
    let mut ticker = tokio::time::interval(health_every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe = signal_rx.recv() => {
                let Some(first) = maybe else { break };
                let mut batch = vec![first];
                while let Ok(signal) = signal_rx.try_recv() {
                    batch.push(signal);
                }
                outcome.signals += batch.len() as u64;

                let now = Instant::now();
                let mut changed = false;
                for signal in &batch {
                    if let Some(event) = health.observe(signal.channel_id, now) {
                        log_health(&event);
                        changed = true;
                    }
                }
                if changed {
                    health_tx.send_replace(health.snapshot());
                }

                for request in fusion.ingest_batch(batch) {
                    let extractor = extractor.clone();
                    extractions.spawn(async move { extractor.extract(request).await });
                }
            }
            _ = ticker.tick() => {
                let events = health.check(Instant::now());
                for event in &events {
                    log_health(event);
                }
                if !events.is_empty() {
                    health_tx.send_replace(health.snapshot());
                }
            }
            Some(joined) = extractions.join_next(), if !extractions.is_empty() => {
                record_extraction(&mut outcome, joined);
            }
        }
    }

    while let Some(joined) = extractions.join_next().await {
        record_extraction(&mut outcome, joined);
    }
    let stats = fusion.stats();
    outcome.events = stats.emitted;
    outcome.suppressed = stats.suppressed;
    outcome
}

fn record_extraction(
    outcome: &mut FusionOutcome,
    joined: Result<ReelResult<ExtractedClip>, tokio::task::JoinError>,
) {
    match joined {
        Ok(Ok(clip)) => outcome.clips.push(clip),
        Ok(Err(e)) => {
            outcome.failures += 1;
            tracing::error!(error = %e, "Clip extraction failed");
        }
        Err(e) => {
            outcome.failures += 1;
            tracing::error!(error = %e, "Clip extraction task failed");
        }
    }
}

fn log_health(event: &HealthEvent) {
    match event {
        HealthEvent::Stalled {
            channel,
            silent_secs,
        } => tracing::warn!(
            channel = channel.as_str(),
            silent_secs,
            "Channel stalled, session degraded"
        ),
        HealthEvent::Recovered { channel } => {
            tracing::info!(channel = channel.as_str(), "Channel recovered")
        }
    }
}
