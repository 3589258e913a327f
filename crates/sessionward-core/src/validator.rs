//! Local and remote session checks.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::api::IdentityEndpoint;
use crate::auth::CredentialStore;
use crate::events::{SessionEvent, SessionEvents};
use crate::metrics::{MetricKind, SecurityMetric, SecurityMetricsCollector};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    NoSession,
    /// The identity service refused the session; it has been cleared.
    Rejected,
    /// The check could not complete; the session is kept.
    Unreachable(String),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }
}

pub struct SessionValidator {
    store: Arc<CredentialStore>,
    identity: Arc<dyn IdentityEndpoint>,
    metrics: Arc<SecurityMetricsCollector>,
    events: SessionEvents,
    timeout: Duration,
}

impl SessionValidator {
    pub(crate) fn new(
        store: Arc<CredentialStore>,
        identity: Arc<dyn IdentityEndpoint>,
        metrics: Arc<SecurityMetricsCollector>,
        events: SessionEvents,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            identity,
            metrics,
            events,
            timeout,
        }
    }

    /// Session present and its access credential not yet expired
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.store.get().is_some_and(|s| s.is_usable_at(now))
    }

    /// Ask the identity service whether the current access credential is
    /// still honoured. A rejection is final: the session is cleared and no
    /// refresh is attempted.
    pub async fn validate_remotely(&self) -> ValidationResult {
        let Some(session) = self.store.get() else {
            return ValidationResult::NoSession;
        };

        let checked = tokio::time::timeout(
            self.timeout,
            self.identity.validate(session.credential.access_token()),
        )
        .await;

        match checked {
            Ok(Ok(())) => {
                self.store.mark_validated(session.generation(), Utc::now());
                debug!(subject = %session.subject_id, "Session validated");
                ValidationResult::Valid
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Session validation timed out");
                ValidationResult::Unreachable("validation timed out".into())
            }
            Ok(Err(e)) if e.is_transient() => {
                warn!(error = %e, "Session validation unavailable");
                ValidationResult::Unreachable(e.to_string())
            }
            Ok(Err(e)) => {
                warn!(error = %e, subject = %session.subject_id, "Session rejected by identity service");
                // A concurrent login or refresh already replaced this session
                if self.store.clear_if_current(session.generation()) {
                    self.metrics.record(
                        SecurityMetric::new(MetricKind::ValidationFailure)
                            .with_attribute("subject", &session.subject_id),
                    );
                    self.events.emit(SessionEvent::ValidationFailed);
                }
                ValidationResult::Rejected
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{IdentityError, TransportError};
    use crate::testing::{expired_session, fresh_session, FakeIdentity};

    struct Harness {
        store: Arc<CredentialStore>,
        identity: Arc<FakeIdentity>,
        metrics: Arc<SecurityMetricsCollector>,
        events: SessionEvents,
        validator: SessionValidator,
    }

    fn harness() -> Harness {
        let store = Arc::new(CredentialStore::new());
        let identity = Arc::new(FakeIdentity::default());
        let metrics = Arc::new(SecurityMetricsCollector::default());
        let events = SessionEvents::new(8);
        let validator = SessionValidator::new(
            Arc::clone(&store),
            identity.clone(),
            Arc::clone(&metrics),
            events.clone(),
            Duration::from_secs(5),
        );
        Harness {
            store,
            identity,
            metrics,
            events,
            validator,
        }
    }

    #[test]
    fn test_local_validity_follows_access_expiry() {
        let h = harness();
        assert!(!h.validator.is_valid());

        h.store.replace(fresh_session("fresh-token"));
        assert!(h.validator.is_valid());
        assert!(!h.validator.is_valid_at(Utc::now() + chrono::Duration::hours(2)));

        h.store.replace(expired_session(chrono::Duration::hours(1)));
        assert!(!h.validator.is_valid());
    }

    #[tokio::test]
    async fn test_remote_success_marks_validated() {
        let h = harness();
        let stored = h.store.replace(fresh_session("fresh-token"));

        assert_eq!(h.validator.validate_remotely().await, ValidationResult::Valid);
        let current = h.store.get().expect("session kept");
        assert!(current.last_validated_at.is_some());
        assert_eq!(current.generation(), stored.generation());
    }

    #[tokio::test]
    async fn test_remote_without_session() {
        let h = harness();
        assert_eq!(h.validator.validate_remotely().await, ValidationResult::NoSession);
        assert_eq!(h.identity.validate_calls(), 0);
    }

    #[tokio::test]
    async fn test_remote_rejection_clears_session() {
        let h = harness();
        let mut rx = h.events.subscribe();
        h.store.replace(fresh_session("fresh-token"));
        h.identity.fail_validate(IdentityError::Rejected("revoked".into()));

        assert_eq!(h.validator.validate_remotely().await, ValidationResult::Rejected);
        assert!(h.store.get().is_none());
        assert!(!h.validator.is_valid());
        assert_eq!(h.metrics.count(MetricKind::ValidationFailure), 1);
        assert_eq!(h.identity.refresh_calls(), 0);
        assert_eq!(rx.recv().await.ok(), Some(SessionEvent::ValidationFailed));
    }

    #[tokio::test]
    async fn test_unreachable_keeps_session() {
        let h = harness();
        h.store.replace(fresh_session("fresh-token"));
        h.identity
            .fail_validate(IdentityError::Transport(TransportError::Network("refused".into())));

        assert!(matches!(
            h.validator.validate_remotely().await,
            ValidationResult::Unreachable(_)
        ));
        assert!(h.store.get().is_some());
        assert_eq!(h.metrics.count(MetricKind::ValidationFailure), 0);
    }
}
