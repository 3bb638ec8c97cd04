//! `DELETE /recordings/{id}` — forwards the delete to the receiver
//! collaborator. Does not touch the local HLS/MP4 caches; the
//! evictor reclaims those on its own schedule once the receiver confirms.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::error::AppError;
use crate::id::receiver_path_suffix;
use crate::state::AppState;

use super::common;

pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, AppError> {
    let decoded = common::decode(&state, &id)?;
    let receiver_path = receiver_path_suffix(&decoded.service_ref)
        .ok_or_else(|| AppError::Invalid("invalid recording id".into()))?;

    state
        .receiver
        .delete(receiver_path)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

    Ok(StatusCode::NO_CONTENT)
}
