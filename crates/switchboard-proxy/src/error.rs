use http::StatusCode;
use switchboard_core::HttpError;
use thiserror::Error;

/// Errors surfaced by the balancing engine
///
/// Every variant is cloneable so the broadcaster can hand the same terminal
/// error to all of its subscribers.
#[derive(Debug, Clone, Error)]
pub enum ProxyError {
    /// No route pattern matched the requested model
    #[error("no route configured for model '{model}'")]
    NoRoute {
        /// The client's model string
        model: String,
    },

    /// A candidate required OAuth and no usable token exists
    #[error("oauth authorization required for account '{account}'")]
    AuthRequired {
        /// Account email the operator must authorize
        account: String,
    },

    /// Every candidate produced a retryable failure
    #[error("all providers failed, last error: {last}")]
    AllProvidersFailed {
        /// Description of the last candidate's failure
        last: String,
        /// Status derived from the last candidate's classification
        status: u16,
    },

    /// Retryable upstream failure, consumed by failover and never surfaced
    /// unless it is the last one standing
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// The upstream stream broke after bytes were already committed
    #[error("stream interrupted: {0}")]
    Streaming(String),

    /// A dedup subscriber exhausted its wait budget
    #[error("timed out waiting for the deduplicated response")]
    DeduplicationTimeout,

    /// The client went away before a response was produced
    #[error("request cancelled by client disconnect")]
    Cancelled,

    /// The request cannot be dispatched as sent
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unexpected internal failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Map a retryable failure's upstream status to the exhaustion status
    ///
    /// 503 and 504 pass through so clients can distinguish overload from
    /// timeout; everything else collapses to 502.
    pub fn exhaustion_status(last_status: Option<u16>) -> u16 {
        match last_status {
            Some(s @ (503 | 504)) => s,
            _ => 502,
        }
    }
}

impl HttpError for ProxyError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NoRoute { .. } | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::AuthRequired { .. } => StatusCode::UNAUTHORIZED,
            Self::AllProvidersFailed { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Upstream(_) | Self::Streaming(_) => StatusCode::BAD_GATEWAY,
            Self::DeduplicationTimeout => StatusCode::GATEWAY_TIMEOUT,
            // Best effort: the client is usually gone by the time this renders
            Self::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_GATEWAY),
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::NoRoute { .. } | Self::InvalidRequest(_) => "invalid_request_error",
            Self::AuthRequired { .. } => "authentication_error",
            Self::AllProvidersFailed { .. } | Self::Upstream(_) => "api_error",
            Self::Streaming(_) => "streaming_error",
            Self::DeduplicationTimeout => "timeout_error",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal_error",
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Internal(_) => "an internal error occurred".to_owned(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_status_passes_through_503_and_504() {
        assert_eq!(ProxyError::exhaustion_status(Some(503)), 503);
        assert_eq!(ProxyError::exhaustion_status(Some(504)), 504);
        assert_eq!(ProxyError::exhaustion_status(Some(500)), 502);
        assert_eq!(ProxyError::exhaustion_status(None), 502);
    }

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(
            ProxyError::NoRoute { model: "m".into() }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::AuthRequired { account: "a".into() }.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ProxyError::DeduplicationTimeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ProxyError::AllProvidersFailed { last: "x".into(), status: 504 }.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
