//! Authentication state: credentials, sessions and the store that owns them.
//!
//! This module provides:
//! - `Credential`: access/refresh token pair with absolute expiries
//! - `Session`: the authenticated state of the process
//! - `CredentialStore`: the single owned session slot, with atomic replace
//!
//! Nothing outside `CredentialStore` ever mutates a `Session`.

pub mod credential;
pub mod session;
pub mod store;

pub use credential::Credential;
pub use session::Session;
pub use store::CredentialStore;
