use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Credential;

/// The authenticated state of this process.
///
/// Sessions are immutable once handed to the [`super::CredentialStore`]; every
/// change produces a new value that replaces the old one wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub credential: Credential,
    pub subject_id: String,
    pub issued_at: DateTime<Utc>,
    pub last_validated_at: Option<DateTime<Utc>>,
    /// Assigned by the store on every replace; never persisted.
    #[serde(skip)]
    pub(crate) generation: u64,
}

impl Session {
    pub fn new(credential: Credential, subject_id: impl Into<String>) -> Self {
        Self {
            credential,
            subject_id: subject_id.into(),
            issued_at: Utc::now(),
            last_validated_at: None,
            generation: 0,
        }
    }

    /// Store generation this session was installed under
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Successor session carrying a refreshed credential
    pub fn with_credential(&self, credential: Credential) -> Self {
        Self {
            credential,
            ..self.clone()
        }
    }

    /// Local fast-path check: access credential not yet expired
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.credential.is_access_expired_at(now)
    }

    /// Whether a persisted session is still worth restoring
    pub fn is_restorable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_usable_at(now) || self.credential.is_refreshable_at(now)
    }
}
