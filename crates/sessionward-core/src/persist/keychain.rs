use anyhow::{Context, Result};
use chrono::Utc;
use keyring::Entry;
use tracing::debug;

use super::PersistenceSink;
use crate::auth::Session;

const SERVICE_NAME: &str = "sessionward";

/// Default keychain account holding the serialized session
const DEFAULT_ACCOUNT: &str = "session";

/// Keeps the session in the OS keychain.
pub struct KeyringSessionSink {
    account: String,
}

impl KeyringSessionSink {
    pub fn new() -> Self {
        Self::for_account(DEFAULT_ACCOUNT)
    }

    /// Separate keychain entry, e.g. one per profile
    pub fn for_account(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(SERVICE_NAME, &self.account).context("Failed to create keyring entry")
    }
}

impl Default for KeyringSessionSink {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistenceSink for KeyringSessionSink {
    fn save(&self, session: &Session) -> Result<()> {
        let contents = serde_json::to_string(session)?;
        self.entry()?
            .set_password(&contents)
            .context("Failed to store session in keychain")
    }

    fn load(&self) -> Result<Option<Session>> {
        let contents = match self.entry()?.get_password() {
            Ok(contents) => contents,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(e) => return Err(e).context("Failed to retrieve session from keychain"),
        };
        let session: Session =
            serde_json::from_str(&contents).context("Failed to parse keychain session")?;

        if session.is_restorable_at(Utc::now()) {
            Ok(Some(session))
        } else {
            debug!("Keychain session has expired");
            Ok(None)
        }
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete session from keychain"),
        }
    }
}
