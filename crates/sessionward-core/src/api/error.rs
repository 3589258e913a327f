use thiserror::Error;

/// Failure to obtain any response at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_builder() {
            TransportError::InvalidRequest(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Rejected by identity service: {0}")]
    Rejected(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl IdentityError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status {
            401 | 403 | 404 | 410 => IdentityError::Rejected(truncated),
            400 | 422 => IdentityError::Invalid(truncated),
            409 => IdentityError::Conflict(truncated),
            429 => IdentityError::RateLimited,
            500..=599 => IdentityError::ServerError(truncated),
            _ => IdentityError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// Transient failures leave the session untouched; anything else is a
    /// definitive answer from the identity service.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IdentityError::RateLimited
                | IdentityError::ServerError(_)
                | IdentityError::InvalidResponse(_)
                | IdentityError::Transport(_)
        )
    }
}
