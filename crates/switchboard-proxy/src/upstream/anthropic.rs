//! Calls to Anthropic-typed providers
//!
//! The request body travels mostly verbatim: only `model` and `stream`
//! have been rewritten by the dispatcher before this module serializes it.

use futures_util::StreamExt;

use crate::protocol::anthropic::MessagesRequest;
use crate::registry::ProviderHandle;

use super::{AuthHeader, BearerKind, BufferedResponse, StreamOpen, apply_auth, buffer_response, content_type_of};

/// API version sent when the client did not provide one
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Beta flag required when authenticating with an OAuth bearer
pub(crate) const OAUTH_BETA: &str = "oauth-2025-04-20";

fn messages_url(provider: &ProviderHandle) -> String {
    let base = provider.config.base_url.as_str().trim_end_matches('/');
    format!("{base}/v1/messages")
}

fn request_builder(
    provider: &ProviderHandle,
    client: &reqwest::Client,
    body: &MessagesRequest,
    auth: &AuthHeader,
    bearer_kind: BearerKind,
    version: Option<&str>,
) -> reqwest::RequestBuilder {
    let builder = client
        .post(messages_url(provider))
        .header("anthropic-version", version.unwrap_or(ANTHROPIC_VERSION))
        .json(body);
    apply_auth(builder, provider, auth, bearer_kind)
}

/// Issue a buffered (non-streaming) call
pub(crate) async fn fetch_buffered(
    provider: &ProviderHandle,
    body: &MessagesRequest,
    auth: &AuthHeader,
    bearer_kind: BearerKind,
    version: Option<&str>,
) -> Result<BufferedResponse, String> {
    let response = request_builder(provider, &provider.client, body, auth, bearer_kind, version)
        .send()
        .await
        .map_err(|e| format!("request to {} failed: {e}", provider.identity))?;

    buffer_response(response).await
}

/// Open a streaming call; non-2xx responses come back fully buffered
pub(crate) async fn open_stream(
    provider: &ProviderHandle,
    body: &MessagesRequest,
    auth: &AuthHeader,
    bearer_kind: BearerKind,
    version: Option<&str>,
) -> Result<StreamOpen, String> {
    let response = request_builder(provider, &provider.streaming_client, body, auth, bearer_kind, version)
        .send()
        .await
        .map_err(|e| format!("stream request to {} failed: {e}", provider.identity))?;

    if !response.status().is_success() {
        return Ok(StreamOpen::Http(buffer_response(response).await?));
    }

    Ok(StreamOpen::Stream {
        status: response.status().as_u16(),
        content_type: content_type_of(&response),
        bytes: response.bytes_stream().boxed(),
    })
}

/// Detects `event: error` frames in a raw SSE byte stream
///
/// Direct mode pipes upstream bytes through untouched, so error detection
/// has to work on raw chunks; this scanner reassembles lines across chunk
/// boundaries and remembers whether an error event went past.
#[derive(Default)]
pub(crate) struct SseErrorScanner {
    partial_line: Vec<u8>,
    saw_error: bool,
}

impl SseErrorScanner {
    pub(crate) fn scan(&mut self, chunk: &[u8]) {
        for byte in chunk {
            if *byte == b'\n' {
                self.check_line();
                self.partial_line.clear();
            } else {
                self.partial_line.push(*byte);
            }
        }
    }

    pub(crate) fn saw_error(&self) -> bool {
        self.saw_error
    }

    fn check_line(&mut self) {
        let line = String::from_utf8_lossy(&self.partial_line);
        let line = line.trim();
        if let Some(event) = line.strip_prefix("event:")
            && event.trim() == "error"
        {
            self.saw_error = true;
        }
    }
}
