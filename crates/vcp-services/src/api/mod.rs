//! HTTP surface of the relay.
//!
//! Clients talk to an OpenAI-compatible `POST /v1/chat/completions`; the
//! request is prepared by the core, orchestrated against the upstream and
//! answered either as one JSON body or as an SSE stream. Service plugins
//! contribute extra routes next to it.

pub mod auth;
pub mod handlers;
pub mod services;
pub mod sse;

use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use vcp_core::AppContext;
use vcp_llm::ProviderError;

use crate::error::Result;
use services::{MountedServices, ServiceCatalog};

/// Shared state accessible by all relay handlers.
#[derive(Clone)]
pub struct ApiState {
    pub ctx: Arc<AppContext>,
    pub started: Instant,
}

impl ApiState {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            ctx,
            started: Instant::now(),
        }
    }
}

/// An error answered in the OpenAI `{"error": {...}}` shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            kind: "invalid_request_error",
            message: "missing or invalid bearer token".into(),
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(e: ProviderError) -> Self {
        let status = match &e {
            ProviderError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ProviderError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProviderError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            kind: "upstream_error",
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {"message": self.message, "type": self.kind}
        });
        (self.status, Json(body)).into_response()
    }
}

/// Build the full router: relay routes plus mounted service routes.
pub fn build_router(state: ApiState, services: Router) -> Router {
    handlers::relay_routes(state.clone())
        .with_state(state)
        .merge(services)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind the configured address and serve until `cancel` fires.
///
/// Service plugins are mounted from `catalog` and shut down after the
/// server has drained.
pub async fn serve(
    ctx: Arc<AppContext>,
    catalog: &ServiceCatalog,
    cancel: CancellationToken,
) -> Result<()> {
    let services = MountedServices::mount(catalog, ctx.registry());
    let router = build_router(ApiState::new(ctx.clone()), services.router());

    let server = &ctx.config().server;
    let listener = TcpListener::bind((server.host.as_str(), server.port)).await?;
    info!(
        addr = %listener.local_addr()?,
        services = services.len(),
        auth = !server.key.is_empty(),
        "relay listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    services.shutdown().await;
    info!("relay stopped");
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_map_to_statuses() {
        let e: ApiError = ProviderError::RateLimited { retry_after_ms: 10 }.into();
        assert_eq!(e.status, StatusCode::TOO_MANY_REQUESTS);
        let e: ApiError = ProviderError::Timeout(30).into();
        assert_eq!(e.status, StatusCode::GATEWAY_TIMEOUT);
        let e: ApiError = ProviderError::RequestFailed("boom".into()).into();
        assert_eq!(e.status, StatusCode::BAD_GATEWAY);
        assert_eq!(e.kind, "upstream_error");
    }
}
