use imagegen_core::error::CoreError;

/// Errors from the provider HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider returned a non-2xx status code.
    #[error("Provider API error ({status}): {body}")]
    Api {
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The response parsed but does not fit the normalized contract.
    #[error("Unexpected provider response: {0}")]
    UnexpectedResponse(String),
}

impl ClientError {
    /// Whether retrying the same call may succeed.
    ///
    /// Transport failures, rate limits and 5xx responses are transient.
    /// Rejections and payloads that cannot be normalized will not change.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Request(e) => !e.is_decode() && !e.is_builder(),
            ClientError::Api { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            ClientError::UnexpectedResponse(_) => false,
        }
    }
}

impl From<ClientError> for CoreError {
    fn from(err: ClientError) -> Self {
        CoreError::ExternalService(err.to_string())
    }
}
