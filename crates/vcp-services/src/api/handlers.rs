//! Relay route handlers.

use axum::extract::State;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tracing::{debug, warn};
use vcp_core::OrchestrationOutcome;
use vcp_llm::{ChatRequest, ChatResponse};

use super::{ApiError, ApiState, auth, sse};

/// Relay and health routes. Only the relay is behind the key check.
pub fn relay_routes(state: ApiState) -> Router<ApiState> {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route_layer(middleware::from_fn_with_state(state, auth::require_key))
        .route("/health", get(health_check))
}

async fn chat_completions(
    State(state): State<ApiState>,
    Json(request): Json<ChatRequest>,
) -> Response {
    let ctx = state.ctx;
    ctx.debug_log().record("request", &request).await;

    let request = ctx.prepare(request).await;
    debug!(
        model = %request.model,
        messages = request.messages.len(),
        stream = request.is_stream(),
        "relaying chat request"
    );

    if request.is_stream() {
        return sse::stream_chat(ctx, request).into_response();
    }

    match ctx.orchestrator().run(&request).await {
        Ok(outcome) => {
            ctx.debug_log().record("response", &outcome_record(&outcome)).await;
            let response = outcome
                .response
                .unwrap_or_else(|| fallback_response(&request.model, &outcome.content));
            Json(response).into_response()
        }
        Err(e) => {
            warn!(error = %e, "chat request failed upstream");
            ApiError::from(e).into_response()
        }
    }
}

/// Returns basic health status, version, and uptime.
async fn health_check(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started.elapsed().as_secs(),
        "plugins": state.ctx.registry().len()
    }))
}

/// What the debug log keeps of a finished exchange.
pub(crate) fn outcome_record(outcome: &OrchestrationOutcome) -> Value {
    json!({
        "content": outcome.content,
        "rounds": outcome.rounds,
        "termination": format!("{:?}", outcome.termination),
        "messages": outcome.messages,
    })
}

fn fallback_response(model: &str, content: &str) -> ChatResponse {
    let mut response = ChatResponse {
        id: String::new(),
        model: model.to_owned(),
        choices: Vec::new(),
        usage: None,
        extra: Default::default(),
    };
    response.set_content(content);
    response
}
