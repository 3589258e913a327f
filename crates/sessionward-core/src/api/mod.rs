//! External collaborators of the session subsystem.
//!
//! This module defines the two network-facing seams and their reqwest
//! implementations:
//! - `Transport`: dispatches application requests (`HttpTransport`)
//! - `IdentityEndpoint`: login, refresh, revoke, registration, activation
//!   and remote session checks (`HttpIdentityEndpoint`)
//!
//! Tokens are opaque strings and every expiry is an absolute instant.

pub mod client;
pub mod error;
pub mod identity;
pub mod transport;

pub use client::HttpIdentityEndpoint;
pub use error::{IdentityError, TransportError};
pub use identity::{
    IdentityEndpoint, LoginCredentials, RegistrationDetails, RegistrationResult, TokenPair,
};
pub use transport::{HttpTransport, Method, RequestDescriptor, ResponseDescriptor, Transport};
