//! Core balancing engine for Switchboard
//!
//! Routes inbound Anthropic-shaped requests across configured upstream
//! providers with health-aware failover, deduplicates concurrent identical
//! requests onto one upstream call, and fans the response (streamed or
//! buffered) out to every waiting client.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod broadcast;
pub mod classify;
pub mod convert;
mod dispatch;
pub mod dedup;
pub mod error;
pub mod fingerprint;
#[cfg(feature = "http")]
pub mod handler;
pub mod health;
pub mod protocol;
pub mod registry;
pub mod routes;
mod state;
mod upstream;

pub use broadcast::{Broadcaster, ResponseHead, Subscription};
pub use dedup::DedupTable;
pub use dispatch::ClientResponse;
pub use error::ProxyError;
pub use fingerprint::Fingerprint;
#[cfg(feature = "http")]
pub use handler::proxy_router;
pub use health::{HealthPolicy, HealthSnapshot, HealthState, HealthTracker};
pub use state::{ProxyState, Snapshot};
