//! Upstream HTTP callers, one submodule per wire protocol

pub(crate) mod anthropic;
pub(crate) mod openai;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use switchboard_config::ProviderType;

use crate::registry::ProviderHandle;

/// Resolved outbound credential for one attempt
#[derive(Debug, Clone)]
pub(crate) enum AuthHeader {
    /// Provider API key (`x-api-key` for Anthropic, bearer for OpenAI)
    ApiKey(String),
    /// Bearer token (static auth token or managed OAuth access token)
    Bearer(String),
    /// Client's full `authorization` header value, forwarded verbatim
    Raw(String),
}

/// Whether the bearer came from the managed OAuth store
///
/// OAuth bearers toward Anthropic need the oauth beta header alongside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BearerKind {
    Static,
    Oauth,
}

/// A fully read upstream response
#[derive(Debug, Clone)]
pub(crate) struct BufferedResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Bytes,
}

/// Result of opening a streaming upstream call
pub(crate) enum StreamOpen {
    /// 2xx: live byte stream follows
    Stream {
        status: u16,
        content_type: String,
        bytes: BoxStream<'static, Result<Bytes, reqwest::Error>>,
    },
    /// Non-2xx: the error body was read in full
    Http(BufferedResponse),
}

/// Apply the resolved credential to an outbound request
pub(crate) fn apply_auth(
    builder: reqwest::RequestBuilder,
    provider: &ProviderHandle,
    auth: &AuthHeader,
    bearer_kind: BearerKind,
) -> reqwest::RequestBuilder {
    let builder = match (auth, provider.config.provider_type) {
        (AuthHeader::ApiKey(key), ProviderType::Anthropic) => builder.header("x-api-key", key),
        (AuthHeader::ApiKey(key), ProviderType::Openai) => builder.bearer_auth(key),
        (AuthHeader::Bearer(token), _) => builder.bearer_auth(token),
        (AuthHeader::Raw(value), _) => builder.header(http::header::AUTHORIZATION, value),
    };

    if bearer_kind == BearerKind::Oauth && provider.config.provider_type == ProviderType::Anthropic {
        builder.header("anthropic-beta", anthropic::OAUTH_BETA)
    } else {
        builder
    }
}

/// Read status, content type, and full body out of a response
pub(crate) async fn buffer_response(response: reqwest::Response) -> Result<BufferedResponse, String> {
    let status = response.status().as_u16();
    let content_type = content_type_of(&response);
    let body = response
        .bytes()
        .await
        .map_err(|e| format!("reading upstream body: {e}"))?;

    Ok(BufferedResponse {
        status,
        content_type,
        body,
    })
}

pub(crate) fn content_type_of(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json")
        .to_owned()
}
