use crate::identity::InteractionStatus;

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A value arrived from the API in a shape we refuse to guess at.
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Identity provider error: {0}")]
    Identity(String),

    /// The host must open `url` and hand the redirect back to the SSO client.
    #[error("Interaction required: {url}")]
    InteractionRequired { url: String },

    #[error("Identity provider busy ({0})")]
    InteractionInProgress(InteractionStatus),

    #[error("OAuth2 error during {operation}: {detail}")]
    OAuth {
        operation: &'static str,
        status: Option<u16>,
        detail: String,
    },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Session service stopped")]
    ServiceStopped,
}

/// Failure of a single profile request.
///
/// The reconciler only cares about two questions: was the API unreachable
/// ([`is_connectivity`](Self::is_connectivity)), or did it reject the credential
/// ([`is_auth`](Self::is_auth))?
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Unexpected status {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("Invalid response body: {0}")]
    Decode(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    /// The API could not be reached or failed on its side.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// The API rejected the credential itself.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized | Self::Forbidden)
    }
}

impl From<Error> for FetchError {
    fn from(e: Error) -> Self {
        match e {
            Error::Fetch(inner) => inner,
            #[cfg(feature = "http")]
            Error::Http(inner) => Self::Network(inner.to_string()),
            Error::Io(inner) => Self::Network(inner.to_string()),
            Error::OAuth {
                status: Some(status),
                detail,
                ..
            } if status >= 500 => Self::Status { status, detail },
            Error::InteractionRequired { .. } | Error::Identity(_) | Error::OAuth { .. } => {
                Self::Unauthorized
            }
            other => Self::Decode(other.to_string()),
        }
    }
}
