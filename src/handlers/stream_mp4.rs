//! `GET /recordings/{id}/stream.mp4` — serves a cached MP4 remux, range
//! requests included, or kicks off the remux ladder behind a `.lock`
//! sentinel and the shared admission gate.

use std::time::{Duration, SystemTime};

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::response::{IntoResponse, Response};
use tokio::fs::OpenOptions;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{info, warn};

use crate::error::AppError;
use crate::mp4::{self, RemuxError};
use crate::source::{self, ResolveError};
use crate::state::AppState;
use crate::supervisor::WatchConfig;

use super::common;

const STALE_LOCK_AGE: Duration = Duration::from_secs(30 * 60);
/// Rough estimate of how long a remux takes, surfaced to the client as
/// `eta_seconds` while it polls; not tied to any per-recording measurement.
const ESTIMATED_REMUX_ETA_SECS: u64 = 30;

pub async fn stream_mp4(State(state): State<AppState>, Path(id): Path<String>, req: Request) -> Result<Response, AppError> {
    let decoded = common::decode(&state, &id)?;
    let final_path = crate::layout::mp4_cache_path(&state.cfg, &decoded.service_ref);

    if tokio::fs::metadata(&final_path).await.is_ok() {
        return serve_cached(&final_path, req).await;
    }

    let lock_path = mp4::sibling(&final_path, ".lock");
    match OpenOptions::new().write(true).create_new(true).open(&lock_path).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            if !is_stale(&lock_path).await {
                return Err(AppError::Preparing { eta_seconds: ESTIMATED_REMUX_ETA_SECS, retry_after_secs: 2 });
            }
            let _ = tokio::fs::remove_file(&lock_path).await;
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
                .await
                .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
        }
        Err(e) => return Err(AppError::Internal(anyhow::anyhow!(e))),
    }

    let resolved = source::resolve(&decoded.service_ref, &state.cfg).await.map_err(|e| {
        let _ = std::fs::remove_file(&lock_path);
        match e {
            ResolveError::Invalid => AppError::Invalid("invalid recording reference".into()),
            ResolveError::NotFound => AppError::NotFound,
            ResolveError::NotReady => AppError::NotReady {
                retry_after_secs: state.cfg.stable_window.as_secs().max(1),
                state: "NOT_STABLE",
            },
        }
    })?;

    let ticket = match state.registry.admission().try_acquire() {
        Ok(ticket) => ticket,
        Err(_) => {
            let _ = tokio::fs::remove_file(&lock_path).await;
            return Err(AppError::TooManyBuilds {
                retry_after_secs: 2,
                max_concurrent: state.registry.admission().capacity(),
            });
        }
    };

    let cfg = state.cfg.clone();
    let cancel = state.shutdown.child_token();
    let input = resolved.spec.clone();
    let tmp_path = mp4::sibling(&final_path, ".tmp");
    let meta_path = mp4::sibling(&final_path, ".meta.json");

    tokio::spawn(async move {
        let _ticket = ticket;
        let outcome = run_remux(&cfg, &input, &tmp_path, &final_path, &meta_path, cancel).await;
        let _ = tokio::fs::remove_file(&lock_path).await;
        match outcome {
            Ok(()) => info!(path = %final_path.display(), "mp4 remux complete"),
            Err(e) => {
                warn!(path = %final_path.display(), error = %e, "mp4 remux failed");
                let _ = tokio::fs::remove_file(&tmp_path).await;
            }
        }
    });

    Err(AppError::Preparing { eta_seconds: ESTIMATED_REMUX_ETA_SECS, retry_after_secs: 2 })
}

async fn run_remux(
    cfg: &crate::config::Config,
    input: &str,
    tmp_path: &std::path::Path,
    final_path: &std::path::Path,
    meta_path: &std::path::Path,
    cancel: tokio_util::sync::CancellationToken,
) -> Result<(), RemuxError> {
    let probe = mp4::probe_codecs(&cfg.prober_bin, input, cfg.stall_timeout).await?;
    let strategy = mp4::decide(&probe)?;
    let watch = WatchConfig {
        startup_grace: cfg.startup_grace,
        stall_timeout: cfg.stall_timeout,
        tick: cfg.supervisor_tick,
    };
    mp4::remux(&cfg.transcoder_bin, input, tmp_path, final_path, meta_path, strategy, watch, cancel).await
}

async fn is_stale(lock_path: &std::path::Path) -> bool {
    let Ok(meta) = tokio::fs::metadata(lock_path).await else {
        return true;
    };
    let Ok(modified) = meta.modified() else {
        return false;
    };
    SystemTime::now().duration_since(modified).unwrap_or_default() > STALE_LOCK_AGE
}

async fn serve_cached(path: &std::path::Path, req: Request) -> Result<Response, AppError> {
    let served = ServeFile::new(path)
        .oneshot(req)
        .await
        .expect("ServeFile is infallible");
    Ok(served.map(Body::new).into_response())
}
