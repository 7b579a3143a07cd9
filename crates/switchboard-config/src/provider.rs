use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

/// Sentinel `auth_value` meaning "forward the client's inbound credential"
pub const PASSTHROUGH_AUTH: &str = "passthrough";

/// Configuration for a single upstream provider
///
/// Identity is `(name, account_email)`: several entries may share a `name`
/// when each carries a different account email.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Provider name, referenced by route candidates
    pub name: String,
    /// Wire protocol the provider speaks
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    /// Base URL of the upstream API
    pub base_url: Url,
    /// How requests to this provider authenticate
    pub auth_type: AuthType,
    /// Credential literal, or `passthrough` to forward the client's
    #[serde(default)]
    pub auth_value: Option<SecretString>,
    /// Account the provider is bound to (required for `oauth` multi-account)
    #[serde(default)]
    pub account_email: Option<String>,
    /// Outbound HTTP proxy for calls to this provider
    #[serde(default)]
    pub proxy: Option<String>,
    /// Disabled providers are skipped by the route resolver
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ProviderConfig {
    /// Stable identity string, used as the health-tracker key
    pub fn identity(&self) -> String {
        self.account_email.as_ref().map_or_else(
            || self.name.clone(),
            |email| format!("{}:{email}", self.name),
        )
    }

    /// Whether the client's inbound credential should be forwarded verbatim
    pub fn forwards_client_credential(&self) -> bool {
        self.auth_value
            .as_ref()
            .is_some_and(|v| v.expose_secret() == PASSTHROUGH_AUTH)
    }
}

/// Wire protocols Switchboard can speak upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// Anthropic Messages API
    Anthropic,
    /// OpenAI-compatible chat completions API
    Openai,
}

/// How a provider's requests are authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// `x-api-key` header
    ApiKey,
    /// `authorization: Bearer` header with a static token
    AuthToken,
    /// `authorization: Bearer` header with a managed OAuth access token
    Oauth,
}

const fn default_enabled() -> bool {
    true
}
