//! ffmpeg process plumbing: spawning, progress parsing, cancellation.

use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use reelcast_common::error::{ReelError, ReelResult};

/// Characters of ffmpeg stderr kept as a failure diagnostic.
pub const DIAGNOSTIC_CHARS: usize = 1000;

const CANCEL_POLL: Duration = Duration::from_millis(200);
const STALL_WARN: Duration = Duration::from_secs(10);

/// Progress callback for render jobs.
pub type ProgressCallback = Box<dyn Fn(RenderProgress) + Send>;

/// Render progress report.
#[derive(Debug, Clone)]
pub struct RenderProgress {
    /// Current progress [0.0, 1.0]. Stays at 0 when the duration is unknown.
    pub progress: f64,

    /// Output time written so far.
    pub out_time_secs: f64,

    /// Estimated time remaining in seconds.
    pub eta_secs: f64,

    pub stage: RenderStage,
}

/// Stages of one render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStage {
    Preparing,
    Rendering,
    Finalizing,
    Complete,
}

/// Arguments every invocation starts with: overwrite, quiet, and
/// machine-readable progress on stdout.
pub fn base_args() -> Vec<String> {
    [
        "-y",
        "-hide_banner",
        "-loglevel",
        "error",
        "-nostats",
        "-progress",
        "pipe:1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Run `program` with `args` to completion.
///
/// Progress lines from `-progress pipe:1` are forwarded to `progress`.
/// Setting `cancel` kills the process and returns [`ReelError::Cancelled`].
/// A non-zero exit becomes a render error carrying the stderr tail.
pub fn run_ffmpeg(
    program: &str,
    args: &[String],
    expected_duration_secs: f64,
    progress: Option<ProgressCallback>,
    cancel: &AtomicBool,
) -> ReelResult<()> {
    tracing::debug!(program, args = ?args, "Running ffmpeg");
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let start = Instant::now();
    let mut child = cmd
        .spawn()
        .map_err(|e| ReelError::render(format!("Failed to start {program}: {e}")))?;

    tracing::info!(pid = child.id(), args_len = args.len(), "ffmpeg process started");

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ReelError::render("Failed to capture ffmpeg stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ReelError::render("Failed to capture ffmpeg stderr"))?;

    // Drain stderr concurrently to avoid ffmpeg blocking on a full stderr pipe.
    let stderr_task = std::thread::spawn(move || -> String {
        let mut reader = BufReader::new(stderr);
        let mut output = String::new();
        match reader.read_to_string(&mut output) {
            Ok(_) => output,
            Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
        }
    });

    let (tx, rx) = mpsc::channel::<ProgressState>();
    let stdout_task = std::thread::spawn(move || {
        let mut reader = BufReader::new(stdout);
        let mut line = String::new();
        let mut state = ProgressState::default();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            if let Some((key, value)) = line.trim().split_once('=') {
                state.update(key, value);
                if key == "progress" && tx.send(state).is_err() {
                    break;
                }
            }
        }
    });

    let mut last_progress_secs = 0.0f64;
    let mut last_progress_wall = Instant::now();
    loop {
        if cancel.load(Ordering::SeqCst) {
            tracing::info!(pid = child.id(), "Cancelling ffmpeg");
            let _ = child.kill();
            let _ = child.wait();
            let _ = stdout_task.join();
            let _ = stderr_task.join();
            return Err(ReelError::Cancelled);
        }

        match rx.recv_timeout(CANCEL_POLL) {
            Ok(state) => {
                if state.out_time_secs > last_progress_secs + 0.001 {
                    last_progress_secs = state.out_time_secs;
                    last_progress_wall = Instant::now();
                }
                if let Some(cb) = &progress {
                    cb(progress_report(
                        &state,
                        expected_duration_secs,
                        start.elapsed().as_secs_f64(),
                    ));
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if last_progress_wall.elapsed() >= STALL_WARN {
            tracing::warn!(
                out_time_secs = last_progress_secs,
                elapsed_secs = start.elapsed().as_secs_f64(),
                "No ffmpeg progress advancement for 10s"
            );
            last_progress_wall = Instant::now();
        }
    }

    let status = child
        .wait()
        .map_err(|e| ReelError::render(format!("Failed to wait on ffmpeg: {e}")))?;
    let _ = stdout_task.join();
    let stderr_output = stderr_task
        .join()
        .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());

    if !status.success() {
        return Err(ReelError::render(format!(
            "ffmpeg failed (status {}): {}",
            status,
            stderr_tail(&stderr_output, DIAGNOSTIC_CHARS)
        )));
    }

    if let Some(cb) = &progress {
        cb(RenderProgress {
            progress: 1.0,
            out_time_secs: last_progress_secs,
            eta_secs: 0.0,
            stage: RenderStage::Complete,
        });
    }
    tracing::info!(elapsed_secs = start.elapsed().as_secs_f64(), "ffmpeg finished");
    Ok(())
}

/// The last `max_chars` characters of `output`, trimmed.
pub fn stderr_tail(output: &str, max_chars: usize) -> &str {
    let trimmed = output.trim();
    let count = trimmed.chars().count();
    if count <= max_chars {
        return trimmed;
    }
    let idx = trimmed
        .char_indices()
        .nth(count - max_chars)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &trimmed[idx..]
}

pub fn command_exists(binary: &str) -> bool {
    Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {binary} >/dev/null 2>&1"))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Container duration in seconds, if ffprobe can tell.
pub fn probe_duration(path: &Path) -> Option<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let raw = String::from_utf8(output.stdout).ok()?;
    let secs = raw.lines().next()?.trim().parse::<f64>().ok()?;
    (secs.is_finite() && secs > 0.0).then_some(secs)
}

#[derive(Debug, Default, Clone, Copy)]
struct ProgressState {
    out_time_secs: f64,
    complete: bool,
}

impl ProgressState {
    fn update(&mut self, key: &str, value: &str) {
        match key {
            // ffmpeg reports microseconds under both names.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<f64>() {
                    self.out_time_secs = us / 1_000_000.0;
                }
            }
            "progress" => {
                self.complete = value == "end";
            }
            _ => {}
        }
    }
}

fn progress_report(
    state: &ProgressState,
    expected_duration_secs: f64,
    elapsed_secs: f64,
) -> RenderProgress {
    let progress = if expected_duration_secs <= 0.0 {
        0.0
    } else {
        (state.out_time_secs / expected_duration_secs).clamp(0.0, 1.0)
    };

    let eta_secs = if progress > 0.0 {
        (elapsed_secs / progress) - elapsed_secs
    } else {
        0.0
    }
    .max(0.0);

    RenderProgress {
        progress: if state.complete { 1.0 } else { progress },
        out_time_secs: state.out_time_secs,
        eta_secs,
        stage: if state.complete {
            RenderStage::Finalizing
        } else {
            RenderStage::Rendering
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_state_parses_out_time() {
        let mut state = ProgressState::default();
        state.update("out_time_us", "2500000");
        assert!((state.out_time_secs - 2.5).abs() < 1e-9);
        state.update("out_time_ms", "4000000");
        assert!((state.out_time_secs - 4.0).abs() < 1e-9);
        state.update("progress", "continue");
        assert!(!state.complete);
        state.update("progress", "end");
        assert!(state.complete);
    }

    #[test]
    fn test_progress_report_fraction_and_eta() {
        let state = ProgressState {
            out_time_secs: 5.0,
            complete: false,
        };
        let report = progress_report(&state, 20.0, 2.0);
        assert!((report.progress - 0.25).abs() < 1e-9);
        assert!((report.eta_secs - 6.0).abs() < 1e-9);
        assert_eq!(report.stage, RenderStage::Rendering);

        let unknown = progress_report(&state, 0.0, 2.0);
        assert_eq!(unknown.progress, 0.0);
    }

    #[test]
    fn test_stderr_tail_keeps_last_chars() {
        let long = format!("{}END", "x".repeat(2000));
        let tail = stderr_tail(&long, 10);
        assert_eq!(tail.chars().count(), 10);
        assert!(tail.ends_with("END"));
        assert_eq!(stderr_tail("  short \n", 10), "short");
        // Multi-byte characters are not split.
        assert_eq!(stderr_tail("ééé", 2), "éé");
    }

    #[test]
    fn test_base_args_request_progress_pipe() {
        let args = base_args();
        let idx = args.iter().position(|a| a == "-progress").unwrap();
        assert_eq!(args[idx + 1], "pipe:1");
        assert_eq!(args[0], "-y");
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_process_reports_stderr_tail() {
        let cancel = AtomicBool::new(false);
        let args = vec!["-c".to_string(), "echo boom >&2; exit 3".to_string()];
        let err = run_ffmpeg("sh", &args, 0.0, None, &cancel).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("boom"), "{message}");
        assert!(message.contains("status"), "{message}");
    }

    #[cfg(unix)]
    #[test]
    fn test_cancel_kills_process() {
        let cancel = AtomicBool::new(true);
        let args = vec!["-c".to_string(), "exec sleep 30".to_string()];
        let started = Instant::now();
        let err = run_ffmpeg("sh", &args, 0.0, None, &cancel).unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_progress_lines_reach_callback() {
        use std::sync::{Arc, Mutex};

        let cancel = AtomicBool::new(false);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb: ProgressCallback = Box::new(move |p| sink.lock().unwrap().push(p.progress));
        let script = "printf 'out_time_us=5000000\\nprogress=continue\\nout_time_us=10000000\\nprogress=end\\n'";
        let args = vec!["-c".to_string(), script.to_string()];
        run_ffmpeg("sh", &args, 10.0, Some(cb), &cancel).unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen.contains(&0.5));
        assert_eq!(seen.last().copied(), Some(1.0));
    }
}
