//! `GET /recordings/{id}/{segment}` — serves an individual HLS segment or
//! init section, confined to the cache dir's allowlist.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use tower_http::services::ServeFile;
use tower::ServiceExt;

use crate::error::AppError;
use crate::state::AppState;

use super::common;

pub async fn segment(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let decoded = common::decode(&state, &id)?;

    let path = crate::layout::confine_segment(&decoded.cache_dir, &name)
        .await
        .ok_or(AppError::NotFound)?;

    let req = axum::http::Request::new(Body::empty());
    let served = ServeFile::new(&path).oneshot(req).await.expect("ServeFile is infallible");
    let mut resp = served.map(Body::new);

    let content_type = if name.ends_with(".ts") {
        "video/MP2T"
    } else {
        "video/mp4"
    };
    let cache_control = if name == "init.mp4" {
        "public, max-age=31536000, immutable"
    } else {
        "public, max-age=6"
    };
    resp.headers_mut()
        .insert(header::CONTENT_TYPE, axum::http::HeaderValue::from_static(content_type));
    resp.headers_mut()
        .insert(header::CONTENT_ENCODING, axum::http::HeaderValue::from_static("identity"));
    resp.headers_mut()
        .insert(header::CACHE_CONTROL, axum::http::HeaderValue::from_static(cache_control));

    Ok(resp)
}
