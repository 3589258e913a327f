use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::IdentityError;

/// Username/password pair presented to `IdentityEndpoint::login`.
#[derive(Clone)]
pub struct LoginCredentials {
    pub username: String,
    password: String,
}

impl LoginCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn is_blank(&self) -> bool {
        self.username.trim().is_empty() || self.password.is_empty()
    }
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationDetails {
    pub username: String,
    pub email: String,
    password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl RegistrationDetails {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for RegistrationDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationDetails")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("display_name", &self.display_name)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResult {
    pub subject_id: String,
    #[serde(default)]
    pub activation_required: bool,
}

/// Tokens issued by a login or refresh call.
///
/// Expiries are absolute. A missing `refresh_token` on a refresh response
/// means the previous refresh token stays in use.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: Option<String>,
    pub refresh_expires_at: Option<DateTime<Utc>>,
    pub subject_id: Option<String>,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_expires_at", &self.access_expires_at)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("refresh_expires_at", &self.refresh_expires_at)
            .field("subject_id", &self.subject_id)
            .finish()
    }
}

/// The identity service the session subsystem talks to.
#[async_trait]
pub trait IdentityEndpoint: Send + Sync {
    async fn login(&self, credentials: &LoginCredentials) -> Result<TokenPair, IdentityError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, IdentityError>;

    /// Best-effort: callers ignore failures beyond logging them.
    async fn revoke(&self, refresh_token: &str) -> Result<(), IdentityError>;

    async fn register(
        &self,
        details: &RegistrationDetails,
    ) -> Result<RegistrationResult, IdentityError>;

    async fn activate(&self, activation_token: &str) -> Result<(), IdentityError>;

    /// Lightweight round-trip confirming the server still honours the session.
    async fn validate(&self, access_token: &str) -> Result<(), IdentityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_credentials_blank() {
        assert!(LoginCredentials::new("", "pw").is_blank());
        assert!(LoginCredentials::new("  ", "pw").is_blank());
        assert!(LoginCredentials::new("alice", "").is_blank());
        assert!(!LoginCredentials::new("alice", "pw").is_blank());
    }

    #[test]
    fn test_secrets_redacted_in_debug() {
        let creds = LoginCredentials::new("alice", "hunter2");
        assert!(!format!("{:?}", creds).contains("hunter2"));

        let details = RegistrationDetails::new("alice", "a@example.test", "hunter2");
        assert!(!format!("{:?}", details).contains("hunter2"));
    }

    #[test]
    fn test_registration_details_serializes_camel_case() {
        let details = RegistrationDetails::new("alice", "a@example.test", "pw")
            .with_display_name("Alice");
        let json = serde_json::to_value(&details).expect("serializable");
        assert_eq!(json["displayName"], "Alice");
        assert_eq!(json["password"], "pw");
    }
}
