//! Shared helpers used by more than one handler: id decoding, the
//! resolve-then-schedule flow that backs both the playlist and timeshift
//! endpoints, and the uniform NotReady retry hint.

use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};

use crate::error::AppError;
use crate::id::decode_id;
use crate::layout;
use crate::registry::ScheduleOutcome;
use crate::source::{self, ResolveError};
use crate::state::AppState;

/// `Retry-After` hint handed back while a build is in flight: a client-facing
/// poll interval, kept small so pollers converge quickly once the asset is
/// ready.
pub const RETRY_AFTER_BUILDING_SECS: u64 = 2;

pub struct Decoded {
    pub service_ref: String,
    pub cache_dir: PathBuf,
}

pub fn decode(state: &AppState, id: &str) -> Result<Decoded, AppError> {
    let service_ref = decode_id(id).ok_or_else(|| AppError::Invalid("invalid recording id".into()))?;
    let cache_dir = layout::cache_dir(&state.cfg, &service_ref);
    Ok(Decoded { service_ref, cache_dir })
}

/// Resolve the source and ask the registry to schedule (or attach to) a
/// build. Always returns an error: either because the source isn't usable,
/// or because the caller must poll again once the build (freshly scheduled
/// or already in flight) makes progress.
pub async fn resolve_and_schedule(state: &AppState, decoded: &Decoded) -> AppError {
    let resolved = match source::resolve(&decoded.service_ref, &state.cfg).await {
        Ok(r) => r,
        Err(ResolveError::Invalid) => return AppError::Invalid("invalid recording reference".into()),
        Err(ResolveError::NotFound) => return AppError::NotFound,
        Err(ResolveError::NotReady) => {
            return AppError::NotReady {
                retry_after_secs: state.cfg.stable_window.as_secs().max(1),
                state: "NOT_STABLE",
            };
        }
    };

    match state.registry.schedule_or_attach(&decoded.cache_dir, resolved.root_key.clone()).await {
        ScheduleOutcome::Scheduled(handle) => {
            crate::build::spawn(handle, resolved, state.cfg.clone(), state.registry.clone());
            AppError::NotReady { retry_after_secs: RETRY_AFTER_BUILDING_SECS, state: "RUNNING" }
        }
        ScheduleOutcome::Attached => {
            AppError::NotReady { retry_after_secs: RETRY_AFTER_BUILDING_SECS, state: "RUNNING" }
        }
        ScheduleOutcome::CircuitOpen => AppError::CircuitOpen { retry_after_secs: state.cfg.breaker_retry_after.as_secs() },
        ScheduleOutcome::TooManyBuilds { max_concurrent } => AppError::TooManyBuilds {
            retry_after_secs: RETRY_AFTER_BUILDING_SECS,
            max_concurrent,
        },
    }
}

/// Read an `.m3u8` file and serve it with the right content type.
pub async fn serve_playlist(path: &Path) -> Result<Response, AppError> {
    let body = tokio::fs::read(path)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
    Ok(Response::builder()
        .header(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(body))
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?
        .into_response())
}
