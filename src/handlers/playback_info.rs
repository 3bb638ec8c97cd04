//! `GET /vod/{recordingId}` — tells the client which endpoint to hit next:
//! a cached MP4 for local sources it can remux directly, or the HLS
//! playlist endpoint otherwise.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::error::AppError;
use crate::source::{self, SourceKind};
use crate::state::AppState;

use super::common;

pub async fn playback_info(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, AppError> {
    let decoded = common::decode(&state, &id)?;

    let resolved = source::resolve(&decoded.service_ref, &state.cfg)
        .await
        .map_err(|e| match e {
            source::ResolveError::Invalid => AppError::Invalid("invalid recording reference".into()),
            source::ResolveError::NotFound => AppError::NotFound,
            source::ResolveError::NotReady => AppError::NotReady {
                retry_after_secs: state.cfg.stable_window.as_secs().max(1),
                state: "NOT_STABLE",
            },
        })?;

    let body = match resolved.kind {
        SourceKind::Local => json!({
            "mode": "direct_mp4",
            "url": format!("/api/v3/recordings/{id}/stream.mp4"),
            "reason": "local recording, remuxed directly to mp4",
        }),
        SourceKind::Receiver => json!({
            "mode": "hls",
            "url": format!("/api/v3/recordings/{id}/playlist.m3u8"),
            "reason": "receiver-hosted source, served as hls",
        }),
    };

    Ok(Json(body))
}
