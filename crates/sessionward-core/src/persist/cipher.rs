//! At-rest encryption for persisted sessions.
//!
//! Each write derives a fresh key from the passphrase with Argon2 (random
//! salt) and seals the payload with ChaCha20-Poly1305 (random nonce).

use std::fmt;

use anyhow::{anyhow, Context, Result};
use argon2::Argon2;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

const ENVELOPE_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// On-disk form of a sealed payload; binary fields are standard base64
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedEnvelope {
    pub version: u8,
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
}

#[derive(Clone)]
pub struct SessionCipher {
    passphrase: String,
}

impl SessionCipher {
    pub fn new(passphrase: impl Into<String>) -> Result<Self> {
        let passphrase = passphrase.into();
        if passphrase.is_empty() {
            return Err(anyhow!("Session passphrase must not be empty"));
        }
        Ok(Self { passphrase })
    }

    fn derive_key(&self, salt: &[u8]) -> Result<ChaCha20Poly1305> {
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(self.passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| anyhow!("Key derivation failed: {}", e))?;
        Ok(ChaCha20Poly1305::new(Key::from_slice(&key)))
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<SealedEnvelope> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .derive_key(&salt)?
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| anyhow!("Failed to encrypt session"))?;

        Ok(SealedEnvelope {
            version: ENVELOPE_VERSION,
            salt: STANDARD.encode(salt),
            nonce: STANDARD.encode(nonce),
            ciphertext: STANDARD.encode(ciphertext),
        })
    }

    pub fn open(&self, envelope: &SealedEnvelope) -> Result<Vec<u8>> {
        if envelope.version != ENVELOPE_VERSION {
            return Err(anyhow!("Unsupported session envelope version {}", envelope.version));
        }
        let salt = STANDARD
            .decode(&envelope.salt)
            .context("Invalid envelope salt")?;
        let nonce = STANDARD
            .decode(&envelope.nonce)
            .context("Invalid envelope nonce")?;
        if nonce.len() != NONCE_LEN {
            return Err(anyhow!("Invalid envelope nonce length {}", nonce.len()));
        }
        let ciphertext = STANDARD
            .decode(&envelope.ciphertext)
            .context("Invalid envelope ciphertext")?;

        self.derive_key(&salt)?
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| anyhow!("Failed to decrypt session - wrong passphrase or corrupted file"))
    }
}

impl fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCipher").finish_non_exhaustive()
    }
}
