//! Shared primitives for Switchboard feature crates
//!
//! Holds the request context passed from the server layer into the
//! dispatcher and the `HttpError` trait that lets feature-crate errors be
//! rendered as HTTP responses without coupling them to axum.

mod context;
mod error;

pub use context::{InboundCredential, RequestContext};
pub use error::HttpError;
