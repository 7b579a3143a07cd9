//! Operator-facing HTTP surface for the token store
//!
//! Drives the authorization-code + PKCE flow and exposes inspection and
//! removal of stored tokens. Mounted by the server crate next to the proxy
//! routes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use dashmap::DashMap;
use serde::Deserialize;
use switchboard_config::OauthSettings;
use switchboard_core::HttpError;
use uuid::Uuid;

use crate::error::OauthError;
use crate::pkce;
use crate::store::TokenStore;
use crate::token;

/// How long an initiated authorization flow stays completable
const PENDING_FLOW_TTL: Duration = Duration::from_secs(600);

/// Shared state for the OAuth endpoints
#[derive(Clone)]
pub struct OauthApi {
    inner: Arc<OauthApiInner>,
}

struct OauthApiInner {
    store: Arc<TokenStore>,
    settings: OauthSettings,
    pending: DashMap<String, PendingFlow>,
    http: reqwest::Client,
}

/// An authorization flow waiting for its callback code
struct PendingFlow {
    verifier: String,
    created_at: Instant,
}

impl OauthApi {
    /// Create the API state around a token store
    pub fn new(store: Arc<TokenStore>, settings: OauthSettings) -> Self {
        Self {
            inner: Arc::new(OauthApiInner {
                store,
                settings,
                pending: DashMap::new(),
                http: reqwest::Client::new(),
            }),
        }
    }

    fn purge_expired_flows(&self) {
        self.inner
            .pending
            .retain(|_, flow| flow.created_at.elapsed() < PENDING_FLOW_TTL);
    }

    fn take_flow(&self, state: Option<&str>) -> Result<PendingFlow, OauthError> {
        self.purge_expired_flows();

        if let Some(state) = state {
            return self
                .inner
                .pending
                .remove(state)
                .map(|(_, flow)| flow)
                .ok_or(OauthError::UnknownState);
        }

        // No state in the callback: unambiguous only with a single pending flow
        if self.inner.pending.len() == 1 {
            let key = self
                .inner
                .pending
                .iter()
                .next()
                .map(|entry| entry.key().clone())
                .ok_or(OauthError::UnknownState)?;
            return self
                .inner
                .pending
                .remove(&key)
                .map(|(_, flow)| flow)
                .ok_or(OauthError::UnknownState);
        }

        Err(OauthError::UnknownState)
    }
}

/// Build the router exposing the `/oauth/*` endpoints
pub fn oauth_router(api: OauthApi) -> Router {
    Router::new()
        .route("/oauth/generate-url", routing::get(generate_url))
        .route("/oauth/exchange-code", routing::post(exchange_code))
        .route("/oauth/refresh/{account_email}", routing::post(refresh))
        .route("/oauth/status", routing::get(status))
        .route("/oauth/tokens", routing::delete(delete_all))
        .route("/oauth/tokens/{account_email}", routing::delete(delete_one))
        .with_state(api)
}

/// Handle `GET /oauth/generate-url`
async fn generate_url(State(api): State<OauthApi>) -> Response {
    api.purge_expired_flows();

    let verifier = pkce::generate_verifier();
    let challenge = pkce::compute_challenge(&verifier);
    let state = Uuid::new_v4().simple().to_string();
    let url = pkce::build_authorization_url(&state, &challenge);

    api.inner.pending.insert(
        state.clone(),
        PendingFlow {
            verifier,
            created_at: Instant::now(),
        },
    );

    Json(serde_json::json!({
        "authorization_url": url,
        "state": state,
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
struct ExchangeRequest {
    /// Authorization code, optionally suffixed with `#state`
    code: String,
    /// Account the resulting token belongs to
    account_email: String,
}

/// Handle `POST /oauth/exchange-code`
async fn exchange_code(State(api): State<OauthApi>, Json(request): Json<ExchangeRequest>) -> Response {
    // Callback pages hand the user a `code#state` pair; accept both forms
    let (code, state) = match request.code.split_once('#') {
        Some((code, state)) => (code, Some(state)),
        None => (request.code.as_str(), None),
    };

    let flow = match api.take_flow(state) {
        Ok(flow) => flow,
        Err(e) => return error_response(&e),
    };

    let exchanged = token::exchange_code(
        &api.inner.http,
        api.inner.settings.proxy.as_deref(),
        code,
        state.unwrap_or_default(),
        &flow.verifier,
    )
    .await;

    match exchanged {
        Ok(response) => {
            api.inner.store.insert(request.account_email.clone(), response).await;
            Json(serde_json::json!({
                "status": "ok",
                "account_email": request.account_email,
            }))
            .into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// Handle `POST /oauth/refresh/{account_email}`
async fn refresh(State(api): State<OauthApi>, Path(account_email): Path<String>) -> Response {
    match api.inner.store.force_refresh(&account_email).await {
        Ok(()) => Json(serde_json::json!({
            "status": "refreshed",
            "account_email": account_email,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

/// Handle `GET /oauth/status`
async fn status(State(api): State<OauthApi>) -> Response {
    let accounts = api.inner.store.snapshot();
    Json(serde_json::json!({ "accounts": accounts })).into_response()
}

/// Handle `DELETE /oauth/tokens`
async fn delete_all(State(api): State<OauthApi>) -> Response {
    let removed = api.inner.store.remove_all().await;
    Json(serde_json::json!({ "removed": removed })).into_response()
}

/// Handle `DELETE /oauth/tokens/{account_email}`
async fn delete_one(State(api): State<OauthApi>, Path(account_email): Path<String>) -> Response {
    if api.inner.store.remove(&account_email).await {
        Json(serde_json::json!({ "removed": account_email })).into_response()
    } else {
        error_response(&OauthError::AccountNotFound(account_email))
    }
}

/// Render an error in the Anthropic error envelope
fn error_response(error: &OauthError) -> Response {
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
