//! Token endpoint interactions: authorization-code exchange and refresh
//!
//! Both operations POST form data to the token endpoint with different
//! grant types. The endpoint lives on the console host, not the inference
//! API; `settings.oauth.proxy` overrides the host, which is also how tests
//! point these calls at a mock.

use serde::Deserialize;

use crate::error::OauthError;

/// Public OAuth client ID for the authorization-code flow
pub(crate) const CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";

/// Browser-facing authorization endpoint
pub(crate) const AUTHORIZE_ENDPOINT: &str = "https://claude.ai/oauth/authorize";

/// Callback the authorization server redirects to with the code
pub(crate) const REDIRECT_URI: &str = "https://console.anthropic.com/oauth/code/callback";

/// Scopes requested during authorization
pub(crate) const SCOPES: &str = "org:create_api_key user:profile user:inference";

/// Default token endpoint host
const TOKEN_HOST: &str = "https://console.anthropic.com";

/// Response from the token endpoint for both exchange and refresh
///
/// `expires_in` is a delta in seconds from response time; the store
/// converts it to an absolute timestamp when recording the token.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// Bearer token for API calls
    pub access_token: String,
    /// Token for obtaining the next access token
    pub refresh_token: String,
    /// Seconds until the access token expires
    pub expires_in: u64,
    /// Space-separated granted scopes
    #[serde(default)]
    pub scope: Option<String>,
}

/// Resolve the token endpoint URL, honoring the configured override
pub(crate) fn token_endpoint(proxy: Option<&str>) -> String {
    let host = proxy.unwrap_or(TOKEN_HOST).trim_end_matches('/');
    format!("{host}/v1/oauth/token")
}

/// Exchange an authorization code for tokens (flow completion)
pub(crate) async fn exchange_code(
    client: &reqwest::Client,
    proxy: Option<&str>,
    code: &str,
    state: &str,
    verifier: &str,
) -> Result<TokenResponse, OauthError> {
    let response = client
        .post(token_endpoint(proxy))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("state", state),
            ("code_verifier", verifier),
            ("client_id", CLIENT_ID),
            ("redirect_uri", REDIRECT_URI),
        ])
        .send()
        .await
        .map_err(|e| OauthError::Http(format!("token exchange request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_else(|_| String::from("<no body>"));
        return Err(OauthError::Rejected(format!("exchange returned {status}: {body}")));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| OauthError::Rejected(format!("invalid token response: {e}")))
}

/// Refresh an access token using a refresh token
pub(crate) async fn refresh_token(
    client: &reqwest::Client,
    proxy: Option<&str>,
    refresh: &str,
) -> Result<TokenResponse, OauthError> {
    let response = client
        .post(token_endpoint(proxy))
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh),
            ("client_id", CLIENT_ID),
        ])
        .send()
        .await
        .map_err(|e| OauthError::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_else(|_| String::from("<no body>"));
        return Err(OauthError::Rejected(format!("refresh returned {status}: {body}")));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| OauthError::Rejected(format!("invalid refresh response: {e}")))
}
