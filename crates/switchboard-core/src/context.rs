use http::HeaderMap;
use secrecy::SecretString;

/// The credential a client presented on the inbound request
///
/// Kept verbatim (header name and value) so providers configured with the
/// `passthrough` sentinel can forward it unchanged.
#[derive(Debug, Clone)]
pub enum InboundCredential {
    /// `x-api-key` header
    ApiKey(SecretString),
    /// `authorization` header (full value, including the `Bearer ` prefix)
    Authorization(SecretString),
}

/// Runtime context for one inbound request
///
/// Built by the server layer before the dispatcher runs; carries everything
/// provider calls need that is not part of the request body.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Credential presented by the client, if any
    pub credential: Option<InboundCredential>,
    /// `anthropic-version` header from the client, forwarded upstream
    pub anthropic_version: Option<String>,
}

impl RequestContext {
    /// Extract the context from inbound request headers
    ///
    /// `x-api-key` wins over `authorization` when both are present, matching
    /// how the upstream API resolves the same ambiguity.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let credential = headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(|v| InboundCredential::ApiKey(SecretString::from(v.to_owned())))
            .or_else(|| {
                headers
                    .get(http::header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| InboundCredential::Authorization(SecretString::from(v.to_owned())))
            });

        let anthropic_version = headers
            .get("anthropic-version")
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);

        Self {
            credential,
            anthropic_version,
        }
    }
}
