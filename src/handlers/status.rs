//! `GET /recordings/{id}/status` — build/readiness snapshot used by clients
//! to avoid polling the playlist endpoint blind.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::error::AppError;
use crate::publish;
use crate::registry::{AttemptMode, Status};
use crate::state::AppState;

use super::common;

pub async fn status(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, AppError> {
    let decoded = common::decode(&state, &id)?;

    if let Some(snap) = state.registry.snapshot(&decoded.cache_dir).await {
        let progressive_ready = publish::progressive_ready(&decoded.cache_dir).await;
        let attempt_mode = match snap.attempt_mode {
            AttemptMode::Fast => "fast",
            AttemptMode::Robust => "robust",
        };
        let body = match snap.status {
            Status::Running => json!({
                "state": "RUNNING",
                "attemptMode": attempt_mode,
                "segmentCount": snap.segment_count,
                "ageSecs": snap.created_at.elapsed().as_secs(),
                "lastProgressSecsAgo": snap.last_progress_at.elapsed().as_secs(),
                "progressiveReady": progressive_ready,
            }),
            Status::Failed => json!({
                "state": "FAILED",
                "lastError": snap.last_error,
                "attemptMode": attempt_mode,
                "segmentCount": snap.segment_count,
                "ageSecs": snap.created_at.elapsed().as_secs(),
                "lastProgressSecsAgo": snap.last_progress_at.elapsed().as_secs(),
                "progressiveReady": progressive_ready,
            }),
        };
        return Ok(Json(body));
    }

    if publish::final_ready(&decoded.cache_dir).await {
        return Ok(Json(json!({ "state": "READY" })));
    }
    if publish::progressive_ready(&decoded.cache_dir).await {
        return Ok(Json(json!({ "state": "RUNNING", "progressiveReady": true })));
    }

    Ok(Json(json!({ "state": "IDLE" })))
}
