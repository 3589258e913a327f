use thiserror::Error;

use crate::api::{IdentityError, ResponseDescriptor, TransportError};
use crate::refresh::TerminalReason;

/// Errors surfaced by [`crate::SessionService`] and the auth pipeline.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Account already exists: {0}")]
    Conflict(String),

    #[error("Registration rejected: {0}")]
    InvalidRegistration(String),

    #[error("Activation token is invalid or expired")]
    InvalidOrExpiredActivationToken,

    #[error("Credential refresh failed, try again later: {0}")]
    TransientRefreshFailure(String),

    #[error("Session expired - please sign in again ({0})")]
    TerminalRefreshFailure(TerminalReason),

    #[error("Request rejected again after credential refresh (status {})", .response.status)]
    ReplayExhausted { response: Box<ResponseDescriptor> },

    #[error("Session rejected by the server")]
    ValidationFailure,

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Identity service error: {0}")]
    Identity(IdentityError),
}

impl SessionError {
    /// Whether the session was cleared as part of producing this error.
    pub fn is_session_expired(&self) -> bool {
        matches!(
            self,
            SessionError::TerminalRefreshFailure(_) | SessionError::ValidationFailure
        )
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::TransientRefreshFailure(_) | SessionError::Transport(_) => true,
            SessionError::Identity(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<IdentityError> for SessionError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Transport(e) => SessionError::Transport(e),
            other => SessionError::Identity(other),
        }
    }
}
