//! Build task glue: orchestrates the already-resolved source, the
//! supervisor, progress tracking, and publish, and reports outcomes back
//! to the registry and breaker. Spawned outside the registry's mutex so a
//! slow build never holds up other callers touching the map.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{info, warn};

use crate::config::Config;
use crate::parts::discover_parts;
use crate::publish;
use crate::registry::{AttemptMode, BuildHandle, BuildRegistry};
use crate::source::{ResolvedSource, SourceKind};
use crate::supervisor::{self, SegmentObserver, SupervisorError, WatchConfig};

struct SegmentCounter {
    dir: PathBuf,
    count: AtomicUsize,
}

impl SegmentObserver for SegmentCounter {
    fn any_segment_written(&self) -> bool {
        self.count.load(Ordering::Relaxed) > 0
    }
}

/// Spawn the background task that drives one scheduled build to completion.
pub fn spawn(
    handle: BuildHandle,
    source: ResolvedSource,
    cfg: Arc<Config>,
    registry: Arc<BuildRegistry>,
) {
    tokio::spawn(async move {
        run(handle, source, cfg, registry).await;
    });
}

async fn run(handle: BuildHandle, source: ResolvedSource, cfg: Arc<Config>, registry: Arc<BuildRegistry>) {
    let BuildHandle { cache_dir, ticket, cancel, root_key } = handle;
    let _ticket = ticket; // held until this task exits, releasing admission.

    if let Err(e) = tokio::fs::create_dir_all(&cache_dir).await {
        warn!(?cache_dir, error = %e, "failed to create cache dir");
        registry.mark_failed(&cache_dir, format!("mkdir failed: {e}")).await;
        registry.breaker().report(&root_key, false);
        return;
    }

    let input_spec = match prepare_input(&cache_dir, &source).await {
        Ok(spec) => spec,
        Err(e) => {
            warn!(?cache_dir, error = %e, "failed to prepare build input");
            registry.mark_failed(&cache_dir, e.clone()).await;
            registry.breaker().report(&root_key, false);
            return;
        }
    };

    let counter = Arc::new(SegmentCounter {
        dir: cache_dir.clone(),
        count: AtomicUsize::new(0),
    });

    let watch = WatchConfig {
        startup_grace: cfg.startup_grace,
        stall_timeout: cfg.stall_timeout,
        tick: cfg.supervisor_tick,
    };

    let attempts = async {
        let fast_args = build_args(&cache_dir, &input_spec, &cfg, AttemptMode::Fast);
        let attempt1 = run_attempt(&cfg, &fast_args, watch_clone(&watch), cancel.clone(), &counter, &registry, &cache_dir, AttemptMode::Fast).await;

        match attempt1 {
            Ok(outcome) => Ok(outcome),
            Err(SupervisorError::ProbeFailed(_)) => {
                info!(?cache_dir, "fast attempt probe-failed, retrying with robust tier");
                let _ = tokio::fs::remove_file(publish::live_playlist(&cache_dir)).await;
                let robust_args = build_args(&cache_dir, &input_spec, &cfg, AttemptMode::Robust);
                run_attempt(&cfg, &robust_args, watch, cancel.clone(), &counter, &registry, &cache_dir, AttemptMode::Robust).await
            }
            Err(other) => Err(other),
        }
    };

    let outcome = match tokio::time::timeout(cfg.build_timeout, attempts).await {
        Ok(outcome) => outcome,
        Err(_elapsed) => {
            warn!(?cache_dir, timeout = ?cfg.build_timeout, "build exceeded overall deadline, cancelling");
            cancel.cancel();
            registry.mark_failed(&cache_dir, "build exceeded overall deadline".to_string()).await;
            registry.breaker().report(&root_key, false);
            return;
        }
    };

    match outcome {
        Ok(_) => match publish::finalize(&cache_dir).await {
            Ok(()) => {
                info!(?cache_dir, "build finalized");
                registry.remove(&cache_dir).await;
                registry.breaker().report(&root_key, true);
            }
            Err(e) => {
                warn!(?cache_dir, error = %e, "finalize failed");
                registry.mark_failed(&cache_dir, format!("finalize failed: {e}")).await;
                registry.breaker().report(&root_key, false);
            }
        },
        Err(SupervisorError::Cancelled) => {
            // sweep_stale already marked this FAILED with "stale: canceled";
            // nothing further to record here.
            info!(?cache_dir, "build cancelled");
        }
        Err(e) => {
            warn!(?cache_dir, error = %e, "build failed");
            registry.mark_failed(&cache_dir, e.to_string()).await;
            registry.breaker().report(&root_key, false);
        }
    }
}

fn watch_clone(w: &WatchConfig) -> WatchConfig {
    WatchConfig {
        startup_grace: w.startup_grace,
        stall_timeout: w.stall_timeout,
        tick: w.tick,
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_attempt(
    cfg: &Config,
    args: &[String],
    watch: WatchConfig,
    cancel: tokio_util::sync::CancellationToken,
    counter: &Arc<SegmentCounter>,
    registry: &Arc<BuildRegistry>,
    cache_dir: &Path,
    mode: AttemptMode,
) -> Result<supervisor::RunOutcome, SupervisorError> {
    let registry = registry.clone();
    let cache_dir = cache_dir.to_path_buf();
    let counter_for_progress = counter.clone();
    supervisor::run(
        &cfg.transcoder_bin,
        args,
        watch,
        cancel,
        counter.as_ref(),
        move |_sample| {
            let seg_count = count_segments_sync(&counter_for_progress.dir);
            counter_for_progress.count.store(seg_count, Ordering::Relaxed);
            let registry = registry.clone();
            let cache_dir = cache_dir.clone();
            tokio::spawn(async move {
                registry.record_progress(&cache_dir, seg_count, mode).await;
            });
        },
    )
    .await
}

fn count_segments_sync(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(Result::ok)
                .filter(|e| {
                    e.file_name()
                        .to_str()
                        .map(crate::layout::is_allowed_segment)
                        .unwrap_or(false)
                })
                .count()
        })
        .unwrap_or(0)
}

/// Resolve what ffmpeg should use as `-i`: the direct path/URL, or a
/// `concat.txt` demuxer list for multi-part local recordings.
async fn prepare_input(cache_dir: &Path, source: &ResolvedSource) -> Result<String, String> {
    match source.kind {
        SourceKind::Receiver => Ok(source.spec.clone()),
        SourceKind::Local => {
            let base = PathBuf::from(&source.spec);
            let parts = discover_parts(&base).await.map_err(|e| e.to_string())?;
            if parts.len() == 1 {
                return Ok(parts[0].to_string_lossy().to_string());
            }
            let concat_path = crate::layout::concat_list_path(cache_dir);
            let mut body = String::new();
            for part in &parts {
                body.push_str(&format!("file '{}'\n", part.to_string_lossy().replace('\'', "'\\''")));
            }
            tokio::fs::write(&concat_path, body)
                .await
                .map_err(|e| format!("failed to write concat list: {e}"))?;
            Ok(format!("concat:{}", concat_path.to_string_lossy()))
        }
    }
}

fn build_args(cache_dir: &Path, input_spec: &str, cfg: &Config, mode: AttemptMode) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into(), "-nostats".into(), "-loglevel".into(), "warning".into()];

    let (probe_size, analyze_us) = match mode {
        AttemptMode::Fast => (cfg.probe_size_fast, cfg.analyze_duration_fast.as_micros() as u64),
        AttemptMode::Robust => (cfg.probe_size_robust, cfg.analyze_duration_robust.as_micros() as u64),
    };
    args.extend(["-probesize".into(), probe_size.to_string()]);
    args.extend(["-analyzeduration".into(), analyze_us.to_string()]);

    if let Some(rest) = input_spec.strip_prefix("concat:") {
        args.extend(["-f".into(), "concat".into(), "-safe".into(), "0".into()]);
        args.extend(["-i".into(), rest.to_string()]);
    } else {
        args.extend(["-i".into(), input_spec.to_string()]);
    }

    match mode {
        AttemptMode::Fast => {
            args.extend(["-c".into(), "copy".into()]);
        }
        AttemptMode::Robust => {
            args.extend([
                "-c:v".into(), "libx264".into(),
                "-preset".into(), "veryfast".into(),
                "-c:a".into(), "aac".into(),
                "-b:a".into(), "128k".into(),
            ]);
        }
    }

    let playlist = publish::live_playlist(cache_dir);
    let seg_pattern = cache_dir.join("seg_%05d.ts");
    args.extend([
        "-f".into(), "hls".into(),
        "-hls_time".into(), "6".into(),
        "-hls_list_size".into(), "0".into(),
        "-hls_playlist_type".into(), "event".into(),
        "-hls_flags".into(), "independent_segments+program_date_time".into(),
        "-hls_segment_filename".into(), seg_pattern.to_string_lossy().to_string(),
        "-progress".into(), "pipe:1".into(),
        playlist.to_string_lossy().to_string(),
    ]);

    args
}
