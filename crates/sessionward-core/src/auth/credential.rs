use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::api::TokenPair;

/// 9999-12-31T23:59:59Z, the latest instant that survives an RFC 3339 round-trip.
const UNBOUNDED_EXPIRY_SECS: i64 = 253_402_300_799;

fn unbounded_expiry() -> DateTime<Utc> {
    DateTime::from_timestamp(UNBOUNDED_EXPIRY_SECS, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Access/refresh credential pair with absolute expiries.
///
/// Invariant: `access_expires_at <= refresh_expires_at`. A credential without
/// a refresh token cannot be refreshed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredCredential")]
pub struct Credential {
    access_token: String,
    access_expires_at: DateTime<Utc>,
    refresh_token: Option<String>,
    refresh_expires_at: DateTime<Utc>,
}

/// Persisted form, passed back through [`Credential::new`] on load
#[derive(Deserialize)]
struct StoredCredential {
    access_token: String,
    access_expires_at: DateTime<Utc>,
    refresh_token: Option<String>,
    refresh_expires_at: DateTime<Utc>,
}

impl From<StoredCredential> for Credential {
    fn from(stored: StoredCredential) -> Self {
        Credential::new(
            stored.access_token,
            stored.access_expires_at,
            stored.refresh_token,
            stored.refresh_expires_at,
        )
    }
}

impl Credential {
    /// Access expiry is clamped to the refresh expiry.
    pub fn new(
        access_token: impl Into<String>,
        access_expires_at: DateTime<Utc>,
        refresh_token: Option<String>,
        refresh_expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            access_expires_at: access_expires_at.min(refresh_expires_at),
            refresh_token: refresh_token.filter(|t| !t.is_empty()),
            refresh_expires_at,
        }
    }

    /// Build a credential from a login response.
    ///
    /// A refresh token without a stated lifetime is assumed valid until the
    /// server says otherwise. Without a refresh token the credential lives
    /// exactly as long as its access token.
    pub fn from_tokens(tokens: TokenPair) -> Self {
        let refresh_expires_at = match (&tokens.refresh_token, tokens.refresh_expires_at) {
            (Some(_), Some(at)) => at,
            (Some(_), None) => unbounded_expiry(),
            (None, _) => tokens.access_expires_at,
        };
        Self::new(
            tokens.access_token,
            tokens.access_expires_at,
            tokens.refresh_token,
            refresh_expires_at,
        )
    }

    /// Build the successor of this credential from a refresh response.
    /// When the server does not rotate the refresh token, the current one
    /// (and its expiry) carries over.
    pub fn rotated(&self, tokens: TokenPair) -> Self {
        match tokens.refresh_token {
            Some(refresh_token) => Self::new(
                tokens.access_token,
                tokens.access_expires_at,
                Some(refresh_token),
                tokens.refresh_expires_at.unwrap_or_else(unbounded_expiry),
            ),
            None => Self::new(
                tokens.access_token,
                tokens.access_expires_at,
                self.refresh_token.clone(),
                self.refresh_expires_at,
            ),
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn access_expires_at(&self) -> DateTime<Utc> {
        self.access_expires_at
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn refresh_expires_at(&self) -> DateTime<Utc> {
        self.refresh_expires_at
    }

    pub fn is_access_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.access_expires_at
    }

    pub fn is_refresh_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.refresh_expires_at
    }

    /// A refresh token is present and has not expired
    pub fn is_refreshable_at(&self, now: DateTime<Utc>) -> bool {
        self.refresh_token.is_some() && !self.is_refresh_expired_at(now)
    }

    pub fn time_until_expiry(&self) -> Duration {
        self.access_expires_at - Utc::now()
    }

    /// Get minutes remaining until access expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        self.time_until_expiry().num_minutes().max(0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("access_expires_at", &self.access_expires_at)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(access: &str, refresh: Option<&str>, refresh_in: Option<i64>) -> TokenPair {
        let now = Utc::now();
        TokenPair {
            access_token: access.to_string(),
            access_expires_at: now + Duration::minutes(15),
            refresh_token: refresh.map(str::to_string),
            refresh_expires_at: refresh_in.map(|m| now + Duration::minutes(m)),
            subject_id: None,
        }
    }

    #[test]
    fn test_access_expiry_clamped_to_refresh_expiry() {
        let now = Utc::now();
        let credential = Credential::new(
            "a",
            now + Duration::hours(2),
            Some("r".into()),
            now + Duration::hours(1),
        );
        assert_eq!(credential.access_expires_at(), credential.refresh_expires_at());
    }

    #[test]
    fn test_from_tokens_without_refresh_is_terminal() {
        let credential = Credential::from_tokens(pair("a", None, None));
        assert!(credential.refresh_token().is_none());
        assert!(!credential.is_refreshable_at(Utc::now()));
        assert_eq!(credential.refresh_expires_at(), credential.access_expires_at());
    }

    #[test]
    fn test_from_tokens_unbounded_refresh_lifetime() {
        let credential = Credential::from_tokens(pair("a", Some("r"), None));
        assert!(credential.is_refreshable_at(Utc::now() + Duration::days(365)));
    }

    #[test]
    fn test_rotated_keeps_refresh_token_when_not_reissued() {
        let original = Credential::from_tokens(pair("a1", Some("r1"), Some(60)));
        let next = original.rotated(pair("a2", None, None));

        assert_eq!(next.access_token(), "a2");
        assert_eq!(next.refresh_token(), Some("r1"));
        assert_eq!(next.refresh_expires_at(), original.refresh_expires_at());
    }

    #[test]
    fn test_rotated_adopts_new_refresh_token() {
        let original = Credential::from_tokens(pair("a1", Some("r1"), Some(60)));
        let next = original.rotated(pair("a2", Some("r2"), Some(120)));
        assert_eq!(next.refresh_token(), Some("r2"));
        assert!(next.refresh_expires_at() > original.refresh_expires_at());
    }

    #[test]
    fn test_expiry_checks() {
        let now = Utc::now();
        let credential = Credential::new(
            "a",
            now - Duration::seconds(1),
            Some("r".into()),
            now + Duration::hours(1),
        );
        assert!(credential.is_access_expired_at(now));
        assert!(credential.is_refreshable_at(now));
        assert!(!credential.is_refreshable_at(now + Duration::hours(2)));
        assert_eq!(credential.minutes_until_expiry(), 0);
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let credential = Credential::from_tokens(pair("access-secret", Some("refresh-secret"), Some(5)));
        let rendered = format!("{:?}", credential);
        assert!(!rendered.contains("access-secret"));
        assert!(!rendered.contains("refresh-secret"));
    }

    #[test]
    fn test_loaded_credential_is_clamped() {
        let json = r#"{
            "access_token": "fresh-token",
            "access_expires_at": "2030-01-01T12:00:00Z",
            "refresh_token": "",
            "refresh_expires_at": "2030-01-01T10:00:00Z"
        }"#;
        let credential: Credential = serde_json::from_str(json).expect("valid credential json");

        assert_eq!(credential.access_expires_at(), credential.refresh_expires_at());
        assert!(credential.refresh_token().is_none());
    }
}
