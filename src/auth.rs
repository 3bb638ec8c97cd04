//! Pass-through seam for the excluded auth/scope layer. The full discovery
//! system authenticates callers and checks `v3:read`/`v3:write` scopes
//! before this subsystem ever sees a request; that middleware lives outside
//! this crate. This layer stands in its place in the stack so the router
//! shape matches what a scoped deployment would look like, without
//! reimplementing the scope model itself.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

pub async fn pass_through(req: Request, next: Next) -> Response {
    next.run(req).await
}
