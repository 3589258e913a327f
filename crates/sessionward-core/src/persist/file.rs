use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::cipher::{SealedEnvelope, SessionCipher};
use super::PersistenceSink;
use crate::auth::Session;

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

#[derive(Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
enum SessionFile {
    Plain { session: Session },
    Sealed { envelope: SealedEnvelope },
}

/// Keeps the session as a JSON file in the cache directory.
pub struct FileSessionSink {
    cache_dir: PathBuf,
    cipher: Option<SessionCipher>,
}

impl FileSessionSink {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            cipher: None,
        }
    }

    /// Encrypt the file at rest
    pub fn with_cipher(mut self, cipher: SessionCipher) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }

    fn encode(&self, session: &Session) -> Result<String> {
        let file = match self.cipher {
            Some(ref cipher) => {
                let plaintext = serde_json::to_vec(session)?;
                SessionFile::Sealed {
                    envelope: cipher.seal(&plaintext)?,
                }
            }
            None => SessionFile::Plain {
                session: session.clone(),
            },
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    fn decode(&self, contents: &str) -> Result<Session> {
        let file: SessionFile =
            serde_json::from_str(contents).context("Failed to parse session file")?;
        match file {
            SessionFile::Plain { session } => Ok(session),
            SessionFile::Sealed { envelope } => {
                let cipher = self
                    .cipher
                    .as_ref()
                    .context("Session file is encrypted but no passphrase is configured")?;
                let plaintext = cipher.open(&envelope)?;
                serde_json::from_slice(&plaintext).context("Failed to parse decrypted session")
            }
        }
    }
}

impl PersistenceSink for FileSessionSink {
    /// Save session to disk atomically (write tmp + rename)
    fn save(&self, session: &Session) -> Result<()> {
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        let path = self.session_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create cache directory")?;
        }
        let contents = self.encode(session)?;

        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_path = path.with_file_name(format!("{}.{}.{}.tmp", SESSION_FILE, std::process::id(), seq));
        std::fs::write(&tmp_path, contents).context("Failed to write session file")?;
        restrict_permissions(&tmp_path)?;
        std::fs::rename(&tmp_path, &path).context("Failed to move session file into place")?;
        Ok(())
    }

    /// Load session from disk, ignoring sessions that can no longer be used
    fn load(&self) -> Result<Option<Session>> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).context("Failed to read session file")?;
        let session = self.decode(&contents)?;

        if session.is_restorable_at(Utc::now()) {
            Ok(Some(session))
        } else {
            debug!("Persisted session has expired");
            Ok(None)
        }
    }

    fn clear(&self) -> Result<()> {
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(path).context("Failed to remove session file")?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .context("Failed to restrict session file permissions")
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
