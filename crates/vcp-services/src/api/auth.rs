//! Bearer key check for the relay endpoint.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use super::{ApiError, ApiState};

/// Reject requests without `Authorization: Bearer <server.key>` when a key
/// is configured. Without a key every request passes.
pub async fn require_key(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let expected = &state.ctx.config().server.key;
    if expected.is_empty() || bearer_token(request.headers()) == Some(expected.expose()) {
        return next.run(request).await;
    }
    warn!(path = %request.uri().path(), "rejected request with missing or wrong key");
    ApiError::unauthorized().into_response()
}

/// The token of a `Bearer` authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
}
