//! Per-request id middleware: stamps every response with `x-request-id`
//! and records it on the request's tracing span, independent of the id
//! each `AppError` mints for its own JSON body.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;
use uuid::Uuid;

pub async fn attach(req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("request", %request_id);

    let mut resp = async move { next.run(req).await }.instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        resp.headers_mut().insert("x-request-id", value);
    }
    resp
}
