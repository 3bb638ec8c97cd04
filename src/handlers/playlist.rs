//! `GET|HEAD /recordings/{id}/playlist.m3u8` — serves the finished VOD
//! playlist when ready, falls back to the in-progress EVENT playlist, and
//! otherwise resolves the source and kicks off (or attaches to) a build
//!.

use axum::extract::{Path, State};
use axum::response::Response;

use crate::error::AppError;
use crate::layout;
use crate::publish;
use crate::state::AppState;

use super::common;

pub async fn playlist(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, AppError> {
    let decoded = common::decode(&state, &id)?;

    if publish::final_ready(&decoded.cache_dir).await {
        return common::serve_playlist(&layout::final_playlist_path(&decoded.cache_dir)).await;
    }
    if publish::progressive_ready(&decoded.cache_dir).await {
        return common::serve_playlist(&layout::live_playlist_path(&decoded.cache_dir)).await;
    }

    Err(common::resolve_and_schedule(&state, &decoded).await)
}
