//! PKCE (RFC 7636) verifier and challenge generation
//!
//! The verifier stays server-side until token exchange; the S256 challenge
//! goes into the authorization URL so the authorization server can verify
//! the exchange request came from the party that initiated the flow.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};
use url::Url;

use crate::token::{AUTHORIZE_ENDPOINT, CLIENT_ID, REDIRECT_URI, SCOPES};

/// Generate a cryptographically random PKCE code verifier
///
/// 64 random bytes as URL-safe base64 (no padding), 86 characters, within
/// the 43..=128 range RFC 7636 requires.
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 64];
    rand::rng().fill(&mut bytes[..]);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compute the S256 code challenge: `BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Build the authorization URL carrying the challenge and an opaque state
///
/// # Panics
///
/// Panics if the hardcoded authorize endpoint is not a valid URL (cannot
/// happen).
pub fn build_authorization_url(state: &str, challenge: &str) -> String {
    let mut url = Url::parse(AUTHORIZE_ENDPOINT).expect("valid authorize endpoint");
    url.query_pairs_mut()
        .append_pair("code", "true")
        .append_pair("client_id", CLIENT_ID)
        .append_pair("response_type", "code")
        .append_pair("redirect_uri", REDIRECT_URI)
        .append_pair("scope", SCOPES)
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("state", state);
    url.into()
}
