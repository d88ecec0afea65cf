//! Errors from the panel client layer.

/// Failure talking to a remote panel.
#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The panel answered with a non-2xx status other than 401.
    #[error("Panel API error ({status}): {body}")]
    Http {
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// Transport succeeded but the body carried a non-200 `code`.
    #[error("Panel rejected the request (code {code}): {message}")]
    Api { code: i64, message: String },

    /// The panel still refused the credentials after a token refresh, or no
    /// refresh was possible.
    #[error("Panel rejected the credentials")]
    Unauthorized,

    /// Another call is refreshing this panel's token right now.
    #[error("Panel token refresh in progress, retry shortly")]
    RefreshInProgress,

    /// Re-authentication or token persistence failed.
    #[error("Panel token refresh failed: {0}")]
    RefreshFailed(String),

    /// The body did not have the expected shape.
    #[error("Unexpected panel response: {0}")]
    Decode(String),
}

impl PanelError {
    /// Whether repeating the same idempotent call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::RefreshInProgress => true,
            Self::Api { .. }
            | Self::Unauthorized
            | Self::RefreshFailed(_)
            | Self::Decode(_) => false,
        }
    }
}
