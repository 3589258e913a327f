//! Best-effort persistence of the current session.
//!
//! The in-memory [`crate::CredentialStore`] is authoritative; sinks only let a
//! session survive a process restart. Two sinks are provided:
//! - `FileSessionSink`: JSON in the cache directory, optionally sealed with
//!   ChaCha20-Poly1305 under an Argon2-derived key (`SessionCipher`)
//! - `KeyringSessionSink`: the OS keychain via `keyring`

pub mod cipher;
pub mod file;
pub mod keychain;
pub(crate) mod writer;

use anyhow::Result;

use crate::auth::Session;

pub use cipher::SessionCipher;
pub use file::FileSessionSink;
pub use keychain::KeyringSessionSink;
pub(crate) use writer::PersistenceWriter;

/// Where a session is kept between runs.
///
/// Implementations may block; the store only calls them from its
/// background writer thread or at start-up.
pub trait PersistenceSink: Send + Sync {
    fn save(&self, session: &Session) -> Result<()>;

    fn load(&self) -> Result<Option<Session>>;

    /// Removing an absent session is not an error.
    fn clear(&self) -> Result<()>;
}
