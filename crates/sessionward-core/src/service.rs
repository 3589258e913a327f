//! The facade hosts build once and share.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::api::{
    IdentityEndpoint, IdentityError, LoginCredentials, RegistrationDetails, RegistrationResult,
    RequestDescriptor, ResponseDescriptor, Transport, TransportError,
};
use crate::auth::{Credential, CredentialStore, Session};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::{SessionEvent, SessionEvents};
use crate::interceptor::AuthPipeline;
use crate::metrics::{
    MetricKind, MetricsSink, SecurityMetric, SecurityMetricsCollector, SecurityMetricsSnapshot,
};
use crate::persist::PersistenceSink;
use crate::refresh::RefreshCoordinator;
use crate::validator::{SessionValidator, ValidationResult};

/// Everything the service talks to outside the process.
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub identity: Arc<dyn IdentityEndpoint>,
    pub persistence: Option<Arc<dyn PersistenceSink>>,
    pub metrics_sink: Option<Arc<dyn MetricsSink>>,
}

impl Collaborators {
    pub fn new(transport: Arc<dyn Transport>, identity: Arc<dyn IdentityEndpoint>) -> Self {
        Self {
            transport,
            identity,
            persistence: None,
            metrics_sink: None,
        }
    }

    pub fn with_persistence(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.persistence = Some(sink);
        self
    }

    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics_sink = Some(sink);
        self
    }
}

/// Session lifecycle for one process: sign in and out, authenticated
/// requests with transparent refresh, validation and security metrics.
///
/// All methods take `&self` and are safe to call concurrently.
pub struct SessionService {
    config: SessionConfig,
    store: Arc<CredentialStore>,
    identity: Arc<dyn IdentityEndpoint>,
    persistence: Option<Arc<dyn PersistenceSink>>,
    metrics: Arc<SecurityMetricsCollector>,
    events: SessionEvents,
    validator: SessionValidator,
    pipeline: AuthPipeline,
}

impl SessionService {
    pub fn new(config: SessionConfig, collaborators: Collaborators) -> Result<Self, SessionError> {
        config.validate()?;
        let Collaborators {
            transport,
            identity,
            persistence,
            metrics_sink,
        } = collaborators;

        let store = Arc::new(match persistence {
            Some(ref sink) => CredentialStore::with_persistence(Arc::clone(sink)),
            None => CredentialStore::new(),
        });
        let metrics = Arc::new(SecurityMetricsCollector::with_capacity(
            metrics_sink,
            config.metrics_log_capacity,
        ));
        let events = SessionEvents::new(config.event_channel_capacity);

        let coordinator = RefreshCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&identity),
            Arc::clone(&metrics),
            events.clone(),
            config.refresh_timeout,
        );
        let validator = SessionValidator::new(
            Arc::clone(&store),
            Arc::clone(&identity),
            Arc::clone(&metrics),
            events.clone(),
            config.validation_timeout,
        );
        let pipeline = AuthPipeline::new(Arc::clone(&store), coordinator, transport);

        Ok(Self {
            config,
            store,
            identity,
            persistence,
            metrics,
            events,
            validator,
            pipeline,
        })
    }

    /// Sign in, replacing any existing session.
    pub async fn authenticate(
        &self,
        credentials: &LoginCredentials,
    ) -> Result<Arc<Session>, SessionError> {
        if credentials.is_blank() {
            return Err(SessionError::InvalidCredentials);
        }

        let tokens = self.identity.login(credentials).await.map_err(|e| match e {
            IdentityError::Rejected(_) | IdentityError::Invalid(_) => {
                warn!(username = %credentials.username, "Login rejected");
                SessionError::InvalidCredentials
            }
            other => other.into(),
        })?;

        let subject_id = tokens
            .subject_id
            .clone()
            .unwrap_or_else(|| credentials.username.clone());
        let session = self
            .store
            .replace(Session::new(Credential::from_tokens(tokens), subject_id));

        info!(subject = %session.subject_id, generation = session.generation(), "Authenticated");
        self.metrics.record(
            SecurityMetric::new(MetricKind::Authenticated).with_attribute("subject", &session.subject_id),
        );
        self.events.emit(SessionEvent::Authenticated {
            subject_id: session.subject_id.clone(),
        });
        Ok(session)
    }

    pub async fn register(
        &self,
        details: &RegistrationDetails,
    ) -> Result<RegistrationResult, SessionError> {
        let result = self.identity.register(details).await.map_err(|e| match e {
            IdentityError::Conflict(msg) => SessionError::Conflict(msg),
            IdentityError::Invalid(msg) => SessionError::InvalidRegistration(msg),
            other => other.into(),
        })?;
        info!(
            subject = %result.subject_id,
            activation_required = result.activation_required,
            "Account registered"
        );
        Ok(result)
    }

    pub async fn activate(&self, activation_token: &str) -> Result<(), SessionError> {
        let token = activation_token.trim();
        if token.is_empty() {
            return Err(SessionError::InvalidOrExpiredActivationToken);
        }
        self.identity.activate(token).await.map_err(|e| match e {
            IdentityError::Rejected(_) | IdentityError::Invalid(_) => {
                SessionError::InvalidOrExpiredActivationToken
            }
            other => other.into(),
        })?;
        info!("Account activated");
        Ok(())
    }

    /// Clear the local session, then revoke the refresh token remotely on a
    /// best-effort basis. Never fails; calling it twice is harmless.
    pub async fn signout(&self) {
        let Some(previous) = self.store.clear() else {
            debug!("Signout without a session");
            return;
        };

        info!(subject = %previous.subject_id, "Signed out");
        self.metrics.record(
            SecurityMetric::new(MetricKind::SignedOut).with_attribute("subject", &previous.subject_id),
        );
        self.events.emit(SessionEvent::SignedOut);

        let Some(refresh_token) = previous.credential.refresh_token() else {
            return;
        };
        match tokio::time::timeout(self.config.revoke_timeout, self.identity.revoke(refresh_token)).await
        {
            Ok(Ok(())) => debug!("Refresh token revoked"),
            Ok(Err(e)) => warn!(error = %e, "Failed to revoke refresh token"),
            Err(_) => warn!("Timed out revoking refresh token"),
        }
    }

    /// Local expiry check, or a round-trip to the identity service when
    /// `remote` is set.
    pub async fn validate_session(&self, remote: bool) -> bool {
        if remote {
            self.validator.validate_remotely().await.is_valid()
        } else {
            self.validator.is_valid()
        }
    }

    /// Remote validation as a typed result. A rejection has already
    /// cleared the session when `ValidationFailure` is returned; an
    /// unreachable identity service keeps it and returns a retryable
    /// transport error.
    pub async fn verify_session(&self) -> Result<(), SessionError> {
        match self.validator.validate_remotely().await {
            ValidationResult::Valid => Ok(()),
            ValidationResult::NoSession => Err(SessionError::NotAuthenticated),
            ValidationResult::Rejected => Err(SessionError::ValidationFailure),
            ValidationResult::Unreachable(reason) => {
                Err(SessionError::Transport(TransportError::Network(reason)))
            }
        }
    }

    pub fn security_metrics(&self) -> SecurityMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Most recent security events, oldest first
    pub fn security_events(&self) -> Vec<SecurityMetric> {
        self.metrics.events()
    }

    /// Send `request` through the auth pipeline
    pub async fn execute(&self, request: &RequestDescriptor) -> Result<ResponseDescriptor, SessionError> {
        self.pipeline.execute(request).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Load the persisted session, if any. A session that can no longer be
    /// used or refreshed is discarded.
    pub fn restore(&self) -> Result<Option<Arc<Session>>> {
        if let Some(current) = self.store.get() {
            return Ok(Some(current));
        }
        let Some(ref sink) = self.persistence else {
            return Ok(None);
        };
        let Some(session) = sink.load().context("Failed to load persisted session")? else {
            return Ok(None);
        };

        if !session.is_restorable_at(Utc::now()) {
            debug!("Discarding expired persisted session");
            sink.clear().context("Failed to remove expired session")?;
            return Ok(None);
        }
        let restored = self.store.restore(session);
        info!(subject = %restored.subject_id, "Session restored");
        Ok(Some(restored))
    }

    pub fn current_session(&self) -> Option<Arc<Session>> {
        self.store.get()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.get().is_some()
    }

    /// Wait for queued persistence writes; call before process exit
    pub async fn flush(&self) {
        self.store.flush().await;
    }
}
