//! Media source contract and stream URI handling.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reelcast_common::error::{ReelError, ReelResult};
use reelcast_detector::{AudioSample, FrameSample};
use reelcast_job_model::{ClipWindow, RetentionWindow};

/// One decoded unit from a live source.
#[derive(Debug, Clone)]
pub enum MediaPacket {
    Frame(FrameSample),
    Audio(AudioSample),
}

impl MediaPacket {
    pub fn pts(&self) -> f64 {
        match self {
            Self::Frame(frame) => frame.pts,
            Self::Audio(audio) => audio.pts,
        }
    }
}

/// Result of waiting on a source.
#[derive(Debug, Clone)]
pub enum SourcePoll {
    Packet(MediaPacket),
    /// Nothing arrived within the timeout.
    Pending,
    /// The stream ended; no further packets will arrive.
    Ended,
}

/// A live stream decoded into analysis samples.
pub trait MediaSource: Send {
    /// Wait up to `timeout` for the next packet.
    fn next_packet(&mut self, timeout: Duration) -> ReelResult<SourcePoll>;

    /// Handle to the media retained for clip extraction.
    fn retained(&self) -> Arc<dyn RetainedMedia>;

    /// Stop decoding and release the connection. Idempotent.
    fn shutdown(&mut self) -> ReelResult<()>;
}

/// The recent stretch of a stream that clips can still be cut from.
pub trait RetainedMedia: Send + Sync {
    /// Currently retained span, in stream seconds.
    fn window(&self) -> RetentionWindow;

    /// Whether the source has ended, so the window will not grow.
    fn is_finished(&self) -> bool;

    /// Write the media in `window` to `out`.
    fn cut(&self, window: &ClipWindow, out: &Path) -> ReelResult<()>;
}

const PASSTHROUGH_SCHEMES: [&str; 6] = ["srt://", "http://", "https://", "udp://", "rtmp://", "rtmps://"];

/// Turn an operator-supplied source into something ffmpeg can open.
///
/// Existing local paths become canonical paths, known URL schemes pass
/// through, and a bare `host:port` becomes an SRT caller URL tuned for
/// live latency.
pub fn normalize_uri(raw: &str) -> ReelResult<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ReelError::config("stream source is empty"));
    }

    let lower = raw.to_ascii_lowercase();
    if PASSTHROUGH_SCHEMES.iter().any(|s| lower.starts_with(s)) {
        return Ok(raw.to_string());
    }

    let path = Path::new(raw);
    if path.exists() {
        let canonical = path.canonicalize()?;
        return Ok(canonical.to_string_lossy().into_owned());
    }

    if let Some((host, port)) = raw.rsplit_once(':') {
        let host_ok = !host.is_empty() && !host.contains('/') && !host.contains("://");
        if host_ok && port.parse::<u16>().is_ok() {
            return Ok(format!(
                "srt://{host}:{port}?mode=caller&transtype=live&latency=1000&peerlatency=1000"
            ));
        }
    }

    Err(ReelError::config(format!(
        "unrecognized stream source {raw:?} (expected a file, a URL, or host:port)"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_port_becomes_srt_caller() {
        assert_eq!(
            normalize_uri("203.0.113.7:7001").unwrap(),
            "srt://203.0.113.7:7001?mode=caller&transtype=live&latency=1000&peerlatency=1000"
        );
    }

    #[test]
    fn test_urls_pass_through() {
        for uri in [
            "srt://example.net:9000?mode=listener",
            "https://cdn.example.net/live.m3u8",
            "udp://239.0.0.1:1234",
            "rtmp://ingest.example.net/app/key",
        ] {
            assert_eq!(normalize_uri(uri).unwrap(), uri);
        }
    }

    #[test]
    fn test_local_file_is_canonicalized() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("match.ts");
        std::fs::write(&file, b"ts").unwrap();
        let normalized = normalize_uri(file.to_str().unwrap()).unwrap();
        assert_eq!(normalized, file.canonicalize().unwrap().to_string_lossy());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(normalize_uri("").is_err());
        assert!(normalize_uri("not a source").is_err());
        assert!(normalize_uri("host:notaport").is_err());
    }
}
