//! MP4 remux decision and ladder. Probes the source once, picks a
//! strategy, and drives the transcoder through up to two fallback tiers,
//! writing `.meta.json` and publishing via the same temp-then-rename
//! pattern as the playlist publisher.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::supervisor::{self, SegmentObserver, SupervisorError, WatchConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Strategy {
    Default,
    Fallback,
    Transcode,
}

#[derive(Debug, thiserror::Error)]
pub enum RemuxError {
    #[error("unsupported source: {0}")]
    Unsupported(String),
    #[error("invalid duration")]
    InvalidDuration,
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error("probe failed: {0}")]
    Probe(#[from] crate::duration::ProbeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct FfprobeStreams {
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    pix_fmt: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CodecProbe {
    pub video_codec: Option<String>,
    pub pix_fmt: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RemuxMeta {
    pub strategy: Strategy,
    pub video_codec: Option<String>,
    pub pix_fmt: Option<String>,
    pub duration_secs: Option<f64>,
}

const EIGHT_BIT_PIX_FMTS: &[&str] = &["yuv420p", "yuvj420p", "yuv422p", "yuv444p", "nv12"];

pub async fn probe_codecs(prober_bin: &str, input: &str, deadline: Duration) -> Result<CodecProbe, RemuxError> {
    let run = tokio::process::Command::new(prober_bin)
        .args(["-v", "error", "-print_format", "json", "-show_streams"])
        .arg(input)
        .output();

    let output = tokio::time::timeout(deadline, run)
        .await
        .map_err(|_| RemuxError::Unsupported("probe timed out".into()))?
        .map_err(|e| RemuxError::Unsupported(e.to_string()))?;

    if !output.status.success() {
        return Err(RemuxError::Unsupported(String::from_utf8_lossy(&output.stderr).trim().to_string()));
    }

    let parsed: FfprobeStreams =
        serde_json::from_slice(&output.stdout).map_err(|_| RemuxError::Unsupported("unparseable probe output".into()))?;

    let video = parsed.streams.into_iter().find(|s| s.codec_type == "video");
    Ok(CodecProbe {
        video_codec: video.as_ref().and_then(|v| v.codec_name.clone()),
        pix_fmt: video.and_then(|v| v.pix_fmt),
    })
}

/// Decide the initial remux strategy from a codec probe.
pub fn decide(probe: &CodecProbe) -> Result<Strategy, RemuxError> {
    let codec = probe.video_codec.as_deref().unwrap_or("");
    let pix_fmt = probe.pix_fmt.as_deref().unwrap_or("");

    if codec.is_empty() {
        return Err(RemuxError::Unsupported("no video stream".into()));
    }
    if codec == "hevc" || codec == "mpeg2video" || !EIGHT_BIT_PIX_FMTS.contains(&pix_fmt) {
        return Ok(Strategy::Transcode);
    }
    if codec == "h264" {
        return Ok(Strategy::Default);
    }
    Err(RemuxError::Unsupported(format!("unsupported codec: {codec}")))
}

struct NullObserver;
impl SegmentObserver for NullObserver {
    fn any_segment_written(&self) -> bool {
        false
    }
}

fn is_ladder_downgrade(err: &SupervisorError) -> bool {
    let text = err.to_string().to_ascii_lowercase();
    text.contains("non-monotonous dts")
        || text.contains("non monotonic")
        || text.contains("timestamps are unset")
}

fn args_for(strategy: Strategy, input: &str, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into(), "-nostdin".into(), "-progress".into(), "pipe:1".into()];

    match strategy {
        Strategy::Default => {
            args.extend(["-i".into(), input.to_string()]);
            args.extend(["-c:v".into(), "copy".into(), "-c:a".into(), "aac".into(), "-ac".into(), "2".into()]);
        }
        Strategy::Fallback => {
            args.extend(["-fflags".into(), "+genpts+discardcorrupt".into()]);
            args.extend(["-i".into(), input.to_string()]);
            args.extend(["-vf".into(), "setpts=PTS-STARTPTS".into()]);
            args.extend(["-c:v".into(), "copy".into(), "-c:a".into(), "aac".into(), "-ac".into(), "2".into()]);
        }
        Strategy::Transcode => {
            args.extend(["-i".into(), input.to_string()]);
            args.extend([
                "-c:v".into(), "libx264".into(),
                "-preset".into(), "veryfast".into(),
                "-pix_fmt".into(), "yuv420p".into(),
                "-c:a".into(), "aac".into(), "-ac".into(), "2".into(),
            ]);
        }
    }
    args.extend(["-movflags".into(), "+faststart".into(), "-f".into(), "mp4".into()]);
    args.push(output.to_string_lossy().to_string());
    args
}

/// Run the remux ladder and publish the result. `tmp_path`/`final_path` are
/// siblings inside the mp4 cache directory; `meta_path` is `.meta.json`.
pub async fn remux(
    transcoder_bin: &str,
    input: &str,
    tmp_path: &Path,
    final_path: &Path,
    meta_path: &Path,
    strategy: Strategy,
    watch: WatchConfig,
    cancel: CancellationToken,
) -> Result<(), RemuxError> {
    let outcome = run_tier(transcoder_bin, input, tmp_path, strategy, watch_clone(&watch), cancel.clone()).await;

    let (used, outcome) = match (strategy, outcome) {
        (Strategy::Default, Err(e)) if is_ladder_downgrade(&e) => {
            info!("remux: downgrading to fallback tier after {e}");
            (
                Strategy::Fallback,
                run_tier(transcoder_bin, input, tmp_path, Strategy::Fallback, watch_clone(&watch), cancel.clone()).await,
            )
        }
        (s, other) => (s, other),
    };

    let (used, outcome) = match (used, outcome) {
        (Strategy::Fallback, Err(SupervisorError::ProbeFailed(msg))) => {
            warn!(%msg, "remux: fallback tier still probe-failed, escalating to transcode");
            (
                Strategy::Transcode,
                run_tier(transcoder_bin, input, tmp_path, Strategy::Transcode, watch_clone(&watch), cancel.clone()).await,
            )
        }
        (s, other) => (s, other),
    };

    outcome?;

    let meta = RemuxMeta {
        strategy: used,
        video_codec: None,
        pix_fmt: None,
        duration_secs: None,
    };
    tokio::fs::write(meta_path, serde_json::to_vec_pretty(&meta).unwrap_or_default()).await?;
    tokio::fs::rename(tmp_path, final_path).await?;
    Ok(())
}

async fn run_tier(
    bin: &str,
    input: &str,
    tmp_path: &Path,
    strategy: Strategy,
    watch: WatchConfig,
    cancel: CancellationToken,
) -> Result<(), SupervisorError> {
    let args = args_for(strategy, input, tmp_path);
    let observer = NullObserver;
    supervisor::run(bin, &args, watch, cancel, &observer, |_| {}).await.map(|_| ())
}

fn watch_clone(w: &WatchConfig) -> WatchConfig {
    WatchConfig {
        startup_grace: w.startup_grace,
        stall_timeout: w.stall_timeout,
        tick: w.tick,
    }
}

/// Path helpers for the mp4 cache sibling files.
pub fn sibling(final_path: &Path, ext: &str) -> PathBuf {
    let mut p = final_path.to_path_buf();
    let name = format!("{}{}", final_path.file_name().unwrap().to_string_lossy(), ext);
    p.set_file_name(name);
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn h264_8bit_is_default_strategy() {
        let probe = CodecProbe {
            video_codec: Some("h264".into()),
            pix_fmt: Some("yuv420p".into()),
        };
        assert!(matches!(decide(&probe), Ok(Strategy::Default)));
    }

    #[test]
    fn hevc_is_transcode_strategy() {
        let probe = CodecProbe {
            video_codec: Some("hevc".into()),
            pix_fmt: Some("yuv420p".into()),
        };
        assert!(matches!(decide(&probe), Ok(Strategy::Transcode)));
    }

    #[test]
    fn ten_bit_pixel_format_forces_transcode() {
        let probe = CodecProbe {
            video_codec: Some("h264".into()),
            pix_fmt: Some("yuv420p10le".into()),
        };
        assert!(matches!(decide(&probe), Ok(Strategy::Transcode)));
    }

    #[test]
    fn unknown_codec_is_unsupported() {
        let probe = CodecProbe {
            video_codec: Some("vp9".into()),
            pix_fmt: Some("yuv420p".into()),
        };
        assert!(matches!(decide(&probe), Err(RemuxError::Unsupported(_))));
    }

    #[test]
    fn no_video_stream_is_unsupported() {
        let probe = CodecProbe { video_codec: None, pix_fmt: None };
        assert!(matches!(decide(&probe), Err(RemuxError::Unsupported(_))));
    }

    #[test]
    fn sibling_appends_suffix() {
        let p = Path::new("/data/vod-cache/abc.mp4");
        assert_eq!(sibling(p, ".lock"), Path::new("/data/vod-cache/abc.mp4.lock"));
    }
}
