use http::StatusCode;
use switchboard_core::HttpError;
use thiserror::Error;

/// Errors from OAuth token management
#[derive(Debug, Error)]
pub enum OauthError {
    /// No token stored for the requested account
    #[error("no token stored for account {0}")]
    AccountNotFound(String),

    /// A token exists but is expired or backing off and cannot be used
    #[error("no usable token for account {0}")]
    TokenUnavailable(String),

    /// The token endpoint rejected an exchange or refresh
    #[error("token endpoint rejected request: {0}")]
    Rejected(String),

    /// Transport failure talking to the token endpoint
    #[error("token endpoint request failed: {0}")]
    Http(String),

    /// OS keyring operation failed
    #[error("keyring: {0}")]
    Keyring(String),

    /// The `state` from an authorization callback matches no pending flow
    #[error("unknown or expired authorization state")]
    UnknownState,
}

impl HttpError for OauthError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::AccountNotFound(_) => StatusCode::NOT_FOUND,
            Self::TokenUnavailable(_) => StatusCode::UNAUTHORIZED,
            Self::Rejected(_) | Self::UnknownState => StatusCode::BAD_REQUEST,
            Self::Http(_) => StatusCode::BAD_GATEWAY,
            Self::Keyring(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::AccountNotFound(_) => "not_found_error",
            Self::TokenUnavailable(_) => "authentication_error",
            Self::Rejected(_) | Self::UnknownState => "invalid_request_error",
            Self::Http(_) => "api_error",
            Self::Keyring(_) => "internal_error",
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Keyring(_) => "credential storage unavailable".to_owned(),
            other => other.to_string(),
        }
    }
}
