//! `GET /recordings/{id}/timeshift.m3u8` — always serves the live (EVENT)
//! playlist. Once a recording has finalized to VOD this canonically stays
//! 503 rather than degrading to the VOD playlist.

use axum::extract::{Path, State};
use axum::response::Response;

use crate::error::AppError;
use crate::layout;
use crate::publish;
use crate::state::AppState;

use super::common;

pub async fn timeshift(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, AppError> {
    let decoded = common::decode(&state, &id)?;

    if publish::progressive_ready(&decoded.cache_dir).await {
        return common::serve_playlist(&layout::live_playlist_path(&decoded.cache_dir)).await;
    }

    if publish::final_ready(&decoded.cache_dir).await {
        return Err(AppError::NotReady { retry_after_secs: 2, state: "FINALIZED" });
    }

    Err(common::resolve_and_schedule(&state, &decoded).await)
}
