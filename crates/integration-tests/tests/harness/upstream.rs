//! Mock upstream servers for integration tests
//!
//! One mock speaks both upstream protocols (Anthropic messages and OpenAI
//! chat completions) plus the OAuth token endpoint, with configurable
//! failure injection and per-request counters.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

/// Behavior knobs for a mock upstream
#[derive(Clone)]
pub struct Behavior {
    /// Fail this many requests before succeeding
    pub fail_count: u32,
    /// Status used for injected failures
    pub fail_status: u16,
    /// Text content of successful responses
    pub response_text: String,
    /// Emit an `event: error` frame mid-stream
    pub stream_error: bool,
    /// Break the connection after two stream frames
    pub stream_drop: bool,
    /// Sleep before answering (to widen dedup race windows)
    pub delay: Option<Duration>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            fail_count: 0,
            fail_status: 500,
            response_text: "Hello from mock upstream".to_owned(),
            stream_error: false,
            stream_drop: false,
            delay: None,
        }
    }
}

struct MockState {
    behavior: Behavior,
    messages_count: AtomicU32,
    chat_count: AtomicU32,
    refresh_count: AtomicU32,
    remaining_failures: AtomicU32,
    last_authorization: Mutex<Option<String>>,
}

/// A running mock upstream
pub struct MockUpstream {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockState>,
}

impl MockUpstream {
    /// Start a well-behaved mock
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with(Behavior::default()).await
    }

    /// Start a mock that fails the first `n` requests with `status`
    pub async fn start_failing(n: u32, status: u16) -> anyhow::Result<Self> {
        Self::start_with(Behavior {
            fail_count: n,
            fail_status: status,
            ..Behavior::default()
        })
        .await
    }

    /// Start a mock with custom response text
    pub async fn start_with_response(text: &str) -> anyhow::Result<Self> {
        Self::start_with(Behavior {
            response_text: text.to_owned(),
            ..Behavior::default()
        })
        .await
    }

    /// Start a mock with the given behavior
    pub async fn start_with(behavior: Behavior) -> anyhow::Result<Self> {
        let state = Arc::new(MockState {
            remaining_failures: AtomicU32::new(behavior.fail_count),
            behavior,
            messages_count: AtomicU32::new(0),
            chat_count: AtomicU32::new(0),
            refresh_count: AtomicU32::new(0),
            last_authorization: Mutex::new(None),
        });

        let app = Router::new()
            .route("/v1/messages", routing::post(handle_messages))
            .route("/v1/chat/completions", routing::post(handle_chat))
            .route("/v1/oauth/token", routing::post(handle_token))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    /// Base URL for configuring this mock as a provider
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Number of `/v1/messages` requests received
    pub fn messages_count(&self) -> u32 {
        self.state.messages_count.load(Ordering::Relaxed)
    }

    /// Number of `/v1/chat/completions` requests received
    pub fn chat_count(&self) -> u32 {
        self.state.chat_count.load(Ordering::Relaxed)
    }

    /// Number of token refresh calls received
    pub fn refresh_count(&self) -> u32 {
        self.state.refresh_count.load(Ordering::Relaxed)
    }

    /// The `authorization` or `x-api-key` header of the last request
    pub fn last_authorization(&self) -> Option<String> {
        self.state.last_authorization.lock().unwrap().clone()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn record_auth(state: &MockState, headers: &HeaderMap) {
    let value = headers
        .get(header::AUTHORIZATION)
        .or_else(|| headers.get("x-api-key"))
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned);
    *state.last_authorization.lock().unwrap() = value;
}

fn take_failure(state: &MockState) -> bool {
    state
        .remaining_failures
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
        .is_ok()
}

fn failure_response(state: &MockState) -> Response {
    (
        StatusCode::from_u16(state.behavior.fail_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(serde_json::json!({
            "type": "error",
            "error": {"type": "api_error", "message": "mock upstream intentional failure"}
        })),
    )
        .into_response()
}

async fn handle_messages(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(request): Json<serde_json::Value>,
) -> Response {
    state.messages_count.fetch_add(1, Ordering::Relaxed);
    record_auth(&state, &headers);

    if let Some(delay) = state.behavior.delay {
        tokio::time::sleep(delay).await;
    }

    if take_failure(&state) {
        return failure_response(&state);
    }

    let model = request["model"].as_str().unwrap_or("mock-model").to_owned();

    if request["stream"].as_bool().unwrap_or(false) {
        return stream_response(&state, &model);
    }

    Json(serde_json::json!({
        "id": "msg_mock_1",
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": [{"type": "text", "text": state.behavior.response_text}],
        "stop_reason": "end_turn",
        "stop_sequence": null,
        "usage": {"input_tokens": 10, "output_tokens": 5}
    }))
    .into_response()
}

fn sse(event: &str, data: serde_json::Value) -> Bytes {
    Bytes::from(format!("event: {event}\ndata: {data}\n\n"))
}

fn stream_response(state: &MockState, model: &str) -> Response {
    let mut frames: Vec<Result<Bytes, std::io::Error>> = vec![
        Ok(sse(
            "message_start",
            serde_json::json!({
                "type": "message_start",
                "message": {
                    "id": "msg_mock_stream", "type": "message", "role": "assistant",
                    "model": model, "content": [], "usage": {"input_tokens": 10, "output_tokens": 0}
                }
            }),
        )),
        Ok(sse(
            "content_block_start",
            serde_json::json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        )),
    ];

    if state.behavior.stream_drop {
        frames.push(Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "mock connection drop",
        )));
        let body = Body::from_stream(futures_util::stream::iter(frames));
        return ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response();
    }

    for word in state.behavior.response_text.split_whitespace() {
        frames.push(Ok(sse(
            "content_block_delta",
            serde_json::json!({
                "type": "content_block_delta", "index": 0,
                "delta": {"type": "text_delta", "text": format!("{word} ")}
            }),
        )));
    }

    if state.behavior.stream_error {
        frames.push(Ok(sse(
            "error",
            serde_json::json!({
                "type": "error",
                "error": {"type": "overloaded_error", "message": "mock mid-stream overload"}
            }),
        )));
        let body = Body::from_stream(futures_util::stream::iter(frames));
        return ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response();
    }

    frames.push(Ok(sse(
        "content_block_stop",
        serde_json::json!({"type": "content_block_stop", "index": 0}),
    )));
    frames.push(Ok(sse(
        "message_delta",
        serde_json::json!({
            "type": "message_delta",
            "delta": {"stop_reason": "end_turn", "stop_sequence": null},
            "usage": {"output_tokens": 5}
        }),
    )));
    frames.push(Ok(sse("message_stop", serde_json::json!({"type": "message_stop"}))));

    let body = Body::from_stream(futures_util::stream::iter(frames));
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

async fn handle_chat(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(request): Json<serde_json::Value>,
) -> Response {
    state.chat_count.fetch_add(1, Ordering::Relaxed);
    record_auth(&state, &headers);

    if let Some(delay) = state.behavior.delay {
        tokio::time::sleep(delay).await;
    }

    if take_failure(&state) {
        return failure_response(&state);
    }

    let model = request["model"].as_str().unwrap_or("mock-model").to_owned();

    if request["stream"].as_bool().unwrap_or(false) {
        let chunks: Vec<Result<Bytes, Infallible>> = vec![
            Ok(Bytes::from(format!(
                "data: {}\n\n",
                serde_json::json!({
                    "id": "chatcmpl-mock", "model": model,
                    "choices": [{"delta": {"role": "assistant", "content": state.behavior.response_text}}]
                })
            ))),
            Ok(Bytes::from(format!(
                "data: {}\n\n",
                serde_json::json!({
                    "choices": [{"delta": {}, "finish_reason": "stop"}],
                    "usage": {"prompt_tokens": 10, "completion_tokens": 5}
                })
            ))),
            Ok(Bytes::from_static(b"data: [DONE]\n\n")),
        ];
        let body = Body::from_stream(futures_util::stream::iter(chunks));
        return ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response();
    }

    Json(serde_json::json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": state.behavior.response_text},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    }))
    .into_response()
}

async fn handle_token(State(state): State<Arc<MockState>>) -> Response {
    // Small delay widens the singleflight race window
    tokio::time::sleep(Duration::from_millis(100)).await;
    let n = state.refresh_count.fetch_add(1, Ordering::Relaxed) + 1;

    Json(serde_json::json!({
        "access_token": format!("at_refreshed_{n}"),
        "refresh_token": format!("rt_refreshed_{n}"),
        "expires_in": 3600,
        "scope": "user:inference"
    }))
    .into_response()
}
