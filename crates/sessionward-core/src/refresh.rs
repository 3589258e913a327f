//! Single-flight credential refresh.
//!
//! However many requests discover an expired credential at once, at most one
//! refresh call is in flight. The cycle runs on its own task and publishes
//! its outcome through a shared future; every caller that asked while it was
//! running receives the identical [`RefreshOutcome`]. A caller giving up on
//! the wait never cancels the cycle for the others.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, error, info, warn};

use crate::api::{IdentityEndpoint, TokenPair};
use crate::auth::{Credential, CredentialStore, Session};
use crate::events::{SessionEvent, SessionEvents};
use crate::metrics::collector::DURATION_MS;
use crate::metrics::{MetricKind, SecurityMetric, SecurityMetricsCollector};

/// Why a session can no longer be refreshed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    NoSession,
    MissingRefreshToken,
    RefreshTokenExpired,
    /// The identity service refused the refresh token
    Rejected,
}

impl TerminalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalReason::NoSession => "no_session",
            TerminalReason::MissingRefreshToken => "missing_refresh_token",
            TerminalReason::RefreshTokenExpired => "refresh_token_expired",
            TerminalReason::Rejected => "refresh_token_rejected",
        }
    }
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    /// Session cleared; the user must authenticate again
    Terminal(TerminalReason),
    /// Timeout, 5xx or network trouble; session kept for a later retry
    Transient(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Success(Credential),
    Failure(RefreshFailure),
}

impl RefreshOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RefreshOutcome::Success(_))
    }
}

type SharedOutcome = Shared<BoxFuture<'static, RefreshOutcome>>;

struct InFlight {
    cycle: u64,
    outcome: SharedOutcome,
}

struct Inner {
    store: Arc<CredentialStore>,
    identity: Arc<dyn IdentityEndpoint>,
    metrics: Arc<SecurityMetricsCollector>,
    events: SessionEvents,
    timeout: Duration,
    in_flight: Mutex<Option<InFlight>>,
    cycles: AtomicU64,
}

/// Clone is cheap; clones share the same in-flight slot.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub(crate) fn new(
        store: Arc<CredentialStore>,
        identity: Arc<dyn IdentityEndpoint>,
        metrics: Arc<SecurityMetricsCollector>,
        events: SessionEvents,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                identity,
                metrics,
                events,
                timeout,
                in_flight: Mutex::new(None),
                cycles: AtomicU64::new(0),
            }),
        }
    }

    /// Join the in-flight refresh cycle, or start one.
    pub async fn request_refresh(&self) -> RefreshOutcome {
        self.request_refresh_for(None).await
    }

    /// Like [`Self::request_refresh`], for a request whose access token
    /// `rejected` was refused. If the store already holds a different access
    /// token (a refresh or a new login finished after the request was sent),
    /// that credential is returned without another network call.
    pub async fn request_refresh_for(&self, rejected: Option<&str>) -> RefreshOutcome {
        let pending = {
            let mut slot = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!(cycle = in_flight.cycle, "Joining in-flight refresh");
                    in_flight.outcome.clone()
                }
                None => {
                    if let Some(current) = self.superseding_credential(rejected) {
                        debug!("Credential already replaced; skipping refresh");
                        return RefreshOutcome::Success(current);
                    }
                    let cycle = self.inner.cycles.fetch_add(1, Ordering::Relaxed) + 1;
                    let outcome = self.start_cycle(cycle);
                    *slot = Some(InFlight {
                        cycle,
                        outcome: outcome.clone(),
                    });
                    outcome
                }
            }
        };
        pending.await
    }

    /// Whether a refresh cycle is currently running
    pub fn is_refreshing(&self) -> bool {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn superseding_credential(&self, rejected: Option<&str>) -> Option<Credential> {
        let rejected = rejected?;
        let session = self.inner.store.get()?;
        (session.credential.access_token() != rejected).then(|| session.credential.clone())
    }

    fn start_cycle(&self, cycle: u64) -> SharedOutcome {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let outcome = inner.run_cycle(cycle).await;
            inner.finish(cycle);
            outcome
        });

        async move {
            task.await.unwrap_or_else(|e| {
                error!(cycle, error = %e, "Refresh task failed");
                RefreshOutcome::Failure(RefreshFailure::Transient("refresh task aborted".into()))
            })
        }
        .boxed()
        .shared()
    }
}

impl Inner {
    async fn run_cycle(&self, cycle: u64) -> RefreshOutcome {
        let Some(session) = self.store.get() else {
            debug!(cycle, "Refresh requested without a session");
            return RefreshOutcome::Failure(RefreshFailure::Terminal(TerminalReason::NoSession));
        };
        let started = Instant::now();
        self.metrics.record(
            SecurityMetric::new(MetricKind::RefreshAttempt).with_attribute("cycle", cycle),
        );

        let refresh_token = match session.credential.refresh_token() {
            None => return self.terminal(&session, TerminalReason::MissingRefreshToken, started),
            Some(_) if session.credential.is_refresh_expired_at(Utc::now()) => {
                return self.terminal(&session, TerminalReason::RefreshTokenExpired, started)
            }
            Some(token) => token.to_string(),
        };

        info!(cycle, subject = %session.subject_id, "Refreshing access credential");
        match tokio::time::timeout(self.timeout, self.identity.refresh(&refresh_token)).await {
            Err(_) => self.transient(
                format!("refresh timed out after {}ms", self.timeout.as_millis()),
                started,
            ),
            Ok(Err(e)) if e.is_transient() => self.transient(e.to_string(), started),
            Ok(Err(e)) => {
                warn!(cycle, error = %e, "Refresh token rejected");
                self.terminal(&session, TerminalReason::Rejected, started)
            }
            Ok(Ok(tokens)) => self.succeed(&session, tokens, started),
        }
    }

    fn succeed(&self, session: &Session, tokens: TokenPair, started: Instant) -> RefreshOutcome {
        let credential = session.credential.rotated(tokens);
        let replaced = self
            .store
            .replace_if_current(session.generation(), session.with_credential(credential));

        let superseded = replaced.is_none();
        self.metrics.record(
            SecurityMetric::new(MetricKind::RefreshSuccess)
                .with_attribute(DURATION_MS, started.elapsed().as_millis())
                .with_attribute("superseded", superseded),
        );

        match replaced {
            Some(stored) => {
                info!(generation = stored.generation(), "Access credential refreshed");
                self.events.emit(SessionEvent::Refreshed {
                    subject_id: stored.subject_id.clone(),
                });
                RefreshOutcome::Success(stored.credential.clone())
            }
            // A login or signout won the race; its state stands
            None => match self.store.get() {
                Some(current) => {
                    debug!("Session replaced during refresh; using current credential");
                    RefreshOutcome::Success(current.credential.clone())
                }
                None => RefreshOutcome::Failure(RefreshFailure::Terminal(TerminalReason::NoSession)),
            },
        }
    }

    fn terminal(&self, session: &Session, reason: TerminalReason, started: Instant) -> RefreshOutcome {
        self.metrics.record(
            SecurityMetric::new(MetricKind::RefreshFailure)
                .with_attribute(DURATION_MS, started.elapsed().as_millis())
                .with_attribute("reason", reason),
        );

        // Clear first: observers of Expired must never see the old session
        if self.store.clear_if_current(session.generation()) {
            warn!(reason = %reason, subject = %session.subject_id, "Forced logout");
            self.metrics.record(
                SecurityMetric::new(MetricKind::ForcedLogout).with_attribute("reason", reason),
            );
            self.events.emit(SessionEvent::Expired { reason });
            return RefreshOutcome::Failure(RefreshFailure::Terminal(reason));
        }

        // A login won the race; the rejection applied to the old session only
        match self.store.get() {
            Some(current) => {
                debug!("Session replaced during failed refresh; using current credential");
                RefreshOutcome::Success(current.credential.clone())
            }
            None => RefreshOutcome::Failure(RefreshFailure::Terminal(reason)),
        }
    }

    fn transient(&self, detail: String, started: Instant) -> RefreshOutcome {
        warn!(error = %detail, "Refresh failed transiently; session kept");
        self.metrics.record(
            SecurityMetric::new(MetricKind::RefreshFailure)
                .with_attribute(DURATION_MS, started.elapsed().as_millis())
                .with_attribute("reason", "transient")
                .with_attribute("detail", &detail),
        );
        RefreshOutcome::Failure(RefreshFailure::Transient(detail))
    }

    fn finish(&self, cycle: u64) {
        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().map(|f| f.cycle) == Some(cycle) {
            *slot = None;
        }
    }
}
