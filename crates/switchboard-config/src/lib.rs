//! Configuration model for Switchboard
//!
//! The configuration is an immutable snapshot: the loader produces a fully
//! validated [`Config`] and the running server only ever swaps whole
//! snapshots, never mutates one in place.

#![allow(clippy::must_use_candidate)]

mod env;
mod loader;
pub mod provider;
pub mod routes;
pub mod settings;

use indexmap::IndexMap;
use serde::Deserialize;

pub use provider::{AuthType, ProviderConfig, ProviderType};
pub use routes::{PASSTHROUGH, RouteCandidate};
pub use settings::{
    CachingTimeouts, DeduplicationSettings, HttpTimeouts, OauthSettings, SelectionStrategy, Settings,
    StreamingMode, TestingSettings, Timeouts,
};

/// Top-level Switchboard configuration
///
/// `model_routes` preserves declaration order: glob patterns are scanned in
/// the order the operator wrote them.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Upstream provider definitions
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Model pattern to candidate list, in declaration order
    #[serde(default)]
    pub model_routes: IndexMap<String, Vec<RouteCandidate>>,
    /// Behavioral settings
    #[serde(default)]
    pub settings: Settings,
}
