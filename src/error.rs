use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{error, warn};
use uuid::Uuid;

/// Internal error taxonomy. Each variant maps to exactly one
/// HTTP status at the API boundary; supervisors and resolvers return these
/// (or the finer-grained kinds that collapse into them) rather than panicking.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("invalid: {0}")]
    Invalid(String),

    #[error("not found")]
    NotFound,

    #[error("not ready")]
    NotReady { retry_after_secs: u64, state: &'static str },

    /// Distinct from `NotReady`: the mp4 remux ladder was just kicked off (or
    /// is already running under the sentinel lock) for `stream.mp4` and has
    /// its own `{code: "PREPARING", eta_seconds, retry_after}` body shape.
    #[error("preparing")]
    Preparing { eta_seconds: u64, retry_after_secs: u64 },

    #[error("too many builds")]
    TooManyBuilds { retry_after_secs: u64, max_concurrent: usize },

    #[error("circuit open")]
    CircuitOpen { retry_after_secs: u64 },

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            AppError::Invalid(_) => "INVALID",
            AppError::NotFound => "NOT_FOUND",
            AppError::NotReady { .. } => "NOT_READY",
            AppError::Preparing { .. } => "PREPARING",
            AppError::TooManyBuilds { .. } => "TOO_MANY_BUILDS",
            AppError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            AppError::SourceUnavailable(_) => "SOURCE_UNAVAILABLE",
            AppError::Internal(_) => "INTERNAL",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Invalid(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::NotReady { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Preparing { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::TooManyBuilds { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::SourceUnavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Public message; internal error text never leaks past this generic string.
    fn message(&self) -> String {
        match self {
            AppError::Invalid(m) => m.clone(),
            AppError::NotFound => "recording not found".to_string(),
            AppError::NotReady { .. } => "build in progress, try again shortly".to_string(),
            AppError::Preparing { .. } => "mp4 remux in progress, try again shortly".to_string(),
            AppError::TooManyBuilds { .. } => "too many concurrent builds".to_string(),
            AppError::CircuitOpen { .. } => "source temporarily unavailable".to_string(),
            AppError::SourceUnavailable(_) => "upstream source unavailable".to_string(),
            AppError::Internal(_) => "internal error".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4();
        match &self {
            AppError::Internal(e) => error!(%request_id, error = ?e, "request failed"),
            AppError::SourceUnavailable(m) => warn!(%request_id, reason = %m, "source unavailable"),
            _ => warn!(%request_id, code = self.code(), "request rejected"),
        }

        if let AppError::Preparing { eta_seconds, retry_after_secs } = &self {
            let body = json!({
                "code": "PREPARING",
                "eta_seconds": eta_seconds,
                "retry_after": retry_after_secs,
            });
            let mut resp = (self.status(), Json(body)).into_response();
            if let Ok(v) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                resp.headers_mut().insert(header::RETRY_AFTER, v);
            }
            return resp;
        }

        let mut body = json!({
            "code": self.code(),
            "message": self.message(),
            "request_id": request_id.to_string(),
        });

        let retry_after = match &self {
            AppError::NotReady { retry_after_secs, state } => {
                body["details"] = json!({ "state": state });
                Some(*retry_after_secs)
            }
            AppError::TooManyBuilds { retry_after_secs, max_concurrent } => {
                body["details"] = json!({ "max_concurrent": max_concurrent });
                Some(*retry_after_secs)
            }
            AppError::CircuitOpen { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };

        let mut resp = (self.status(), Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(v) = HeaderValue::from_str(&secs.to_string()) {
                resp.headers_mut().insert(header::RETRY_AFTER, v);
            }
        }
        resp
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Internal(e)
    }
}
