//! OAuth credential management for Switchboard
//!
//! Maintains per-account OAuth tokens for providers that authenticate with
//! a managed bearer token: acquisition via the authorization-code + PKCE
//! flow, automatic refresh with per-account singleflight, selection across
//! accounts, and optional persistence in the OS keyring.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod error;
#[cfg(feature = "http")]
mod http;
mod keyring_store;
mod pkce;
mod store;
mod token;

pub use error::OauthError;
#[cfg(feature = "http")]
pub use http::{OauthApi, oauth_router};
pub use pkce::{build_authorization_url, compute_challenge, generate_verifier};
pub use store::{AccountSnapshot, OauthToken, TokenStore};
pub use token::TokenResponse;
