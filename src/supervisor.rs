//! Supervisor. Launches the transcoder, enforces startup grace + stall
//! timeout, kills on cancel, classifies stderr.

use std::process::Stdio;
use std::time::Instant;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::progress::{self, ProgressSample, PROGRESS_CHANNEL_CAPACITY};

const STDERR_CAP: usize = 8 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("ffmpeg stalled: no progress for longer than the configured timeout")]
    Stalled,
    #[error("build cancelled")]
    Cancelled,
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("probe failed: {0}")]
    ProbeFailed(String),
    #[error("ffmpeg failed: {0}")]
    FfmpegFatal(String),
    #[error("failed to launch transcoder: {0}")]
    SpawnFailed(String),
}

pub struct WatchConfig {
    pub startup_grace: std::time::Duration,
    pub stall_timeout: std::time::Duration,
    pub tick: std::time::Duration,
}

pub struct RunOutcome {
    pub stderr_tail: String,
    pub segments_written: bool,
}

/// Callback invoked with each progress sample and whether at least one
/// segment file has shown up on disk, used to decide `segments_written`
/// at failure-classification time.
pub trait SegmentObserver: Send + Sync {
    fn any_segment_written(&self) -> bool;
}

pub async fn run(
    bin: &str,
    args: &[String],
    watch: WatchConfig,
    cancel: CancellationToken,
    observer: &dyn SegmentObserver,
    on_progress: impl Fn(&ProgressSample) + Send,
) -> Result<RunOutcome, SupervisorError> {
    let mut cmd = Command::new(bin);
    cmd.args(args)
        .arg("-nostdin")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    info!(bin, ?args, "starting transcoder");

    let mut child = cmd
        .spawn()
        .map_err(|e| SupervisorError::SpawnFailed(e.to_string()))?;

    let stdout = child.stdout.take().expect("piped stdout");
    let mut stderr = child.stderr.take().expect("piped stderr");

    let (progress_tx, mut progress_rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
    tokio::spawn(progress::pump(stdout, progress_tx));

    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf).await;
        let text = String::from_utf8_lossy(&buf).to_string();
        if text.len() > STDERR_CAP {
            text[text.len() - STDERR_CAP..].to_string()
        } else {
            text
        }
    });

    let started = Instant::now();
    let mut last_progress = started;
    let mut tick = tokio::time::interval(watch.tick);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let wait_result = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(SupervisorError::Cancelled);
            }

            status = child.wait() => {
                break status;
            }

            sample = progress_rx.recv() => {
                if let Some(sample) = sample {
                    last_progress = Instant::now();
                    on_progress(&sample);
                }
            }

            _ = tick.tick() => {
                if started.elapsed() > watch.startup_grace
                    && last_progress.elapsed() > watch.stall_timeout
                {
                    warn!("transcoder stalled, killing");
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return Err(SupervisorError::Stalled);
                }
            }
        }
    };

    let stderr_tail = stderr_task.await.unwrap_or_default();
    let status = wait_result.map_err(|e| SupervisorError::FfmpegFatal(e.to_string()))?;

    if status.success() {
        return Ok(RunOutcome {
            stderr_tail,
            segments_written: observer.any_segment_written(),
        });
    }

    Err(classify_failure(&stderr_tail, observer.any_segment_written()))
}

fn classify_failure(stderr: &str, segments_written: bool) -> SupervisorError {
    let lower = stderr.to_ascii_lowercase();

    if stderr.trim().is_empty() && !segments_written {
        return SupervisorError::FfmpegFatal("ffmpeg exited with no output and no stderr".into());
    }
    if segments_written {
        // A late failure after progress was made is a fatal encode error,
        // not a source/probe problem.
        return SupervisorError::FfmpegFatal(tail(&lower));
    }

    const AUTH_OR_MISSING: &[&str] = &[
        "401", "403", "404", "unauthorized", "forbidden", "connection refused", "no route to host",
    ];
    if AUTH_OR_MISSING.iter().any(|p| lower.contains(p)) {
        return SupervisorError::SourceUnavailable(tail(&lower));
    }

    const PROBE_FAILURE: &[&str] = &[
        "no streams",
        "invalid data found when processing input",
        "unknown codec",
        "could not find codec parameters",
        "error while decoding",
    ];
    if PROBE_FAILURE.iter().any(|p| lower.contains(p)) {
        return SupervisorError::ProbeFailed(tail(&lower));
    }

    SupervisorError::FfmpegFatal(tail(&lower))
}

fn tail(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.len() > 512 {
        trimmed[trimmed.len() - 512..].to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stderr_no_segments_is_fatal() {
        assert!(matches!(classify_failure("", false), SupervisorError::FfmpegFatal(_)));
    }

    #[test]
    fn late_failure_after_segments_is_fatal_not_probe() {
        let err = classify_failure("invalid data found when processing input", true);
        assert!(matches!(err, SupervisorError::FfmpegFatal(_)));
    }

    #[test]
    fn auth_failure_classified_unavailable() {
        let err = classify_failure("HTTP error 401 Unauthorized", false);
        assert!(matches!(err, SupervisorError::SourceUnavailable(_)));
    }

    #[test]
    fn probe_failure_classified_retryable() {
        let err = classify_failure("Invalid data found when processing input", false);
        assert!(matches!(err, SupervisorError::ProbeFailed(_)));
    }

    #[test]
    fn unknown_nonzero_exit_is_fatal() {
        let err = classify_failure("some encoder specific error", false);
        assert!(matches!(err, SupervisorError::FfmpegFatal(_)));
    }
}
