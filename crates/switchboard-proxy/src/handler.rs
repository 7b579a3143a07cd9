//! Axum handlers for the client-facing proxy surface

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Router, routing};
use switchboard_config::ProviderType;
use switchboard_core::{HttpError, RequestContext};

use crate::dispatch::ClientResponse;
use crate::error::ProxyError;
use crate::protocol::anthropic::MessagesRequest;
use crate::state::ProxyState;

/// Build the router for `/v1/messages` and `/providers`
pub fn proxy_router(state: ProxyState) -> Router {
    Router::new()
        .route("/v1/messages", routing::post(messages))
        .route("/providers", routing::get(providers))
        .with_state(state)
}

/// Handle `POST /v1/messages`
async fn messages(
    State(state): State<ProxyState>,
    headers: HeaderMap,
    Json(request): Json<MessagesRequest>,
) -> Response {
    let ctx = RequestContext::from_headers(&headers);

    match state.handle_messages(request, ctx).await {
        Ok(ClientResponse::Buffered {
            status,
            content_type,
            body,
        }) => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::OK),
            [(header::CONTENT_TYPE, content_type)],
            body,
        )
            .into_response(),
        Ok(ClientResponse::Stream {
            status,
            content_type,
            body,
        }) => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::OK),
            [(header::CONTENT_TYPE, content_type)],
            Body::from_stream(body),
        )
            .into_response(),
        Err(error) => error_response(&error),
    }
}

/// Handle `GET /providers`
async fn providers(State(state): State<ProxyState>) -> Response {
    let snapshot = state.snapshot();

    let providers: Vec<serde_json::Value> = snapshot
        .registry
        .entries()
        .iter()
        .map(|provider| {
            serde_json::json!({
                "name": provider.config.name,
                "account_email": provider.config.account_email,
                "type": provider_type_name(provider.config.provider_type),
                "enabled": provider.config.enabled,
                "health": state.health().snapshot(&provider.identity),
            })
        })
        .collect();

    Json(serde_json::json!({ "providers": providers })).into_response()
}

const fn provider_type_name(provider_type: ProviderType) -> &'static str {
    match provider_type {
        ProviderType::Anthropic => "anthropic",
        ProviderType::Openai => "openai",
    }
}

/// Render an error in the Anthropic error envelope
fn error_response(error: &ProxyError) -> Response {
    let status = error.status_code();
    let body = serde_json::json!({
        "type": "error",
        "error": {
            "type": error.error_type(),
            "message": error.client_message(),
        }
    });
    (status, Json(body)).into_response()
}
