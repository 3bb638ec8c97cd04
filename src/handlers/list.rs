//! `GET /recordings?root=<id>&path=<rel>` — lists a directory under a
//! configured recording root, best-effort annotating each file with its
//! probed duration.

use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::duration;
use crate::error::AppError;
use crate::id::sanitize_rel_path;
use crate::state::AppState;

const PROBE_DEADLINE: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    root: String,
    #[serde(default)]
    path: String,
}

pub async fn list(State(state): State<AppState>, Query(q): Query<ListQuery>) -> Result<impl IntoResponse, AppError> {
    let root_path = state
        .cfg
        .recording_roots
        .get(&q.root)
        .ok_or_else(|| AppError::Invalid("unknown recording root".into()))?;

    let (clean_rel, blocked) = sanitize_rel_path(&q.path);
    if blocked {
        return Err(AppError::Invalid("path escapes recording root".into()));
    }

    let dir = std::path::Path::new(root_path).join(&clean_rel);

    let mut entries = tokio::fs::read_dir(&dir)
        .await
        .map_err(|_| AppError::NotFound)?;

    let mut items = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Ok(file_type) = entry.file_type().await else {
            continue;
        };
        let name = entry.file_name().to_string_lossy().to_string();
        let rel_path = if clean_rel.is_empty() {
            name.clone()
        } else {
            format!("{clean_rel}/{name}")
        };

        if file_type.is_dir() {
            items.push(json!({ "name": name, "type": "dir", "path": rel_path }));
            continue;
        }

        let duration_secs = duration::probe(&state.cfg.prober_bin, &entry.path(), PROBE_DEADLINE)
            .await
            .ok();

        items.push(json!({
            "name": name,
            "type": "file",
            "path": rel_path,
            "durationSecs": duration_secs,
        }));
    }

    Ok(Json(json!({ "root": q.root, "path": clean_rel, "items": items })))
}
