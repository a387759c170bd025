use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("identity provider rejected the request (HTTP {status}): {message}")]
    Provider { status: u16, message: String },

    #[error("malformed provider response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("credential persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("no active session")]
    NoSession,
}

impl AuthError {
    pub fn provider(status: u16, message: impl Into<String>) -> Self {
        Self::Provider {
            status,
            message: message.into(),
        }
    }

    /// True when the failure means the provider could not be reached at all,
    /// as opposed to the provider answering with a rejection.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// A definitive provider rejection, as opposed to the provider being
    /// unreachable or answering with a server-side failure.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Provider { status, .. } if (400..500).contains(status))
    }
}
