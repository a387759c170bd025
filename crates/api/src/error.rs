use thiserror::Error;

use nutrio_auth::AuthError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Token acquisition failed before any network call was made.
    #[error("no credential available for request to {url}")]
    NoCredentialAvailable { url: String },

    /// The server rejected the request even after a forced token refresh, or
    /// the refresh itself yielded no token. Terminal for this request.
    #[error("still unauthorized after token refresh for {url}")]
    UnauthorizedAfterRefresh { url: String },

    /// Transport-level failure, passed through untouched.
    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl ApiError {
    pub fn no_credential(url: impl Into<String>) -> Self {
        Self::NoCredentialAvailable { url: url.into() }
    }

    pub fn unauthorized_after_refresh(url: impl Into<String>) -> Self {
        Self::UnauthorizedAfterRefresh { url: url.into() }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// True for the terminal auth failures that trigger escalation.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::NoCredentialAvailable { .. } | Self::UnauthorizedAfterRefresh { .. }
        )
    }
}
