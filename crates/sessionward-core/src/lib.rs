//! SessionWard core - client-side session and token lifecycle management.
//!
//! The crate keeps a single authoritative [`Session`] per process, attaches
//! its access credential to outbound requests, refreshes it exactly once when
//! many requests discover expiry at the same time, and replays the rejected
//! requests transparently.
//!
//! Callers interact with [`SessionService`]; everything else is exposed so
//! hosts can supply their own [`Transport`], [`IdentityEndpoint`],
//! [`PersistenceSink`] and [`MetricsSink`] implementations.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod interceptor;
pub mod metrics;
pub mod persist;
pub mod refresh;
pub mod service;
pub mod validator;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{
    HttpIdentityEndpoint, HttpTransport, IdentityEndpoint, IdentityError, LoginCredentials,
    Method, RegistrationDetails, RegistrationResult, RequestDescriptor, ResponseDescriptor,
    TokenPair, Transport, TransportError,
};
pub use auth::{Credential, CredentialStore, Session};
pub use config::{Config, PersistenceMode, SessionConfig};
pub use error::SessionError;
pub use events::SessionEvent;
pub use interceptor::{
    AuthPipeline, PreparedRequest, RequestInterceptor, ResponseClass, ResponseInterceptor,
};
pub use metrics::{
    MetricKind, MetricsSink, SecurityMetric, SecurityMetricsCollector, SecurityMetricsSnapshot,
    TracingMetricsSink,
};
pub use persist::{FileSessionSink, KeyringSessionSink, PersistenceSink, SessionCipher};
pub use refresh::{RefreshCoordinator, RefreshFailure, RefreshOutcome, TerminalReason};
pub use service::{Collaborators, SessionService};
pub use validator::{SessionValidator, ValidationResult};
