//! Scripted collaborators shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};

use crate::api::{
    IdentityEndpoint, IdentityError, LoginCredentials, RegistrationDetails, RegistrationResult,
    RequestDescriptor, ResponseDescriptor, TokenPair, Transport, TransportError,
};
use crate::auth::{Credential, Session};
use crate::persist::PersistenceSink;

/// Session whose access token expired a second ago and whose refresh token
/// expires `refresh_in` from now.
pub(crate) fn expired_session(refresh_in: ChronoDuration) -> Session {
    let now = Utc::now();
    Session::new(
        Credential::new(
            "stale-access",
            now - ChronoDuration::seconds(1),
            Some("refresh-0".into()),
            now + refresh_in,
        ),
        "user-1",
    )
}

pub(crate) fn fresh_session(access_token: &str) -> Session {
    let now = Utc::now();
    Session::new(
        Credential::new(
            access_token,
            now + ChronoDuration::minutes(15),
            Some("refresh-0".into()),
            now + ChronoDuration::hours(1),
        ),
        "user-1",
    )
}

pub(crate) enum RefreshBehavior {
    Issue,
    Fail(IdentityError),
}

/// Identity service whose answers are set per test.
pub(crate) struct FakeIdentity {
    refresh_behavior: Mutex<RefreshBehavior>,
    refresh_delay: Mutex<Duration>,
    refresh_calls: AtomicUsize,
    login_calls: AtomicUsize,
    revoke_calls: AtomicUsize,
    validate_calls: AtomicUsize,
    issued: AtomicUsize,
    login_error: Mutex<Option<IdentityError>>,
    revoke_error: Mutex<Option<IdentityError>>,
    validate_error: Mutex<Option<IdentityError>>,
    register_error: Mutex<Option<IdentityError>>,
    activate_error: Mutex<Option<IdentityError>>,
}

impl Default for FakeIdentity {
    fn default() -> Self {
        Self {
            refresh_behavior: Mutex::new(RefreshBehavior::Issue),
            refresh_delay: Mutex::new(Duration::ZERO),
            refresh_calls: AtomicUsize::new(0),
            login_calls: AtomicUsize::new(0),
            revoke_calls: AtomicUsize::new(0),
            validate_calls: AtomicUsize::new(0),
            issued: AtomicUsize::new(0),
            login_error: Mutex::new(None),
            revoke_error: Mutex::new(None),
            validate_error: Mutex::new(None),
            register_error: Mutex::new(None),
            activate_error: Mutex::new(None),
        }
    }
}

impl FakeIdentity {
    pub(crate) fn set_refresh_behavior(&self, behavior: RefreshBehavior) {
        *self.refresh_behavior.lock().unwrap() = behavior;
    }

    pub(crate) fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = delay;
    }

    pub(crate) fn fail_login(&self, error: IdentityError) {
        *self.login_error.lock().unwrap() = Some(error);
    }

    pub(crate) fn fail_revoke(&self, error: IdentityError) {
        *self.revoke_error.lock().unwrap() = Some(error);
    }

    pub(crate) fn fail_validate(&self, error: IdentityError) {
        *self.validate_error.lock().unwrap() = Some(error);
    }

    pub(crate) fn fail_register(&self, error: IdentityError) {
        *self.register_error.lock().unwrap() = Some(error);
    }

    pub(crate) fn fail_activate(&self, error: IdentityError) {
        *self.activate_error.lock().unwrap() = Some(error);
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn revoke_calls(&self) -> usize {
        self.revoke_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn validate_calls(&self) -> usize {
        self.validate_calls.load(Ordering::SeqCst)
    }

    fn issue(&self, access_prefix: &str, refresh_prefix: &str) -> TokenPair {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        TokenPair {
            access_token: format!("{}-{}", access_prefix, n),
            access_expires_at: now + ChronoDuration::minutes(15),
            refresh_token: Some(format!("{}-{}", refresh_prefix, n)),
            refresh_expires_at: Some(now + ChronoDuration::hours(1)),
            subject_id: Some("user-1".into()),
        }
    }
}

#[async_trait]
impl IdentityEndpoint for FakeIdentity {
    async fn login(&self, _credentials: &LoginCredentials) -> Result<TokenPair, IdentityError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.login_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(self.issue("fresh-login", "login-refresh"))
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenPair, IdentityError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.refresh_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failure = match *self.refresh_behavior.lock().unwrap() {
            RefreshBehavior::Issue => None,
            RefreshBehavior::Fail(ref e) => Some(e.clone()),
        };
        match failure {
            Some(e) => Err(e),
            None => Ok(self.issue("fresh-access", "fresh-refresh")),
        }
    }

    async fn revoke(&self, _refresh_token: &str) -> Result<(), IdentityError> {
        self.revoke_calls.fetch_add(1, Ordering::SeqCst);
        match self.revoke_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn register(
        &self,
        details: &RegistrationDetails,
    ) -> Result<RegistrationResult, IdentityError> {
        if let Some(e) = self.register_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(RegistrationResult {
            subject_id: format!("subject-{}", details.username),
            activation_required: true,
        })
    }

    async fn activate(&self, _activation_token: &str) -> Result<(), IdentityError> {
        match self.activate_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn validate(&self, _access_token: &str) -> Result<(), IdentityError> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        match self.validate_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Resource server that honours any bearer token starting with `fresh-`.
///
/// - no bearer token, or any other token: 401
/// - URLs ending in `/admin`: 403 for every authenticated caller
#[derive(Default)]
pub(crate) struct FakeTransport {
    sent: Mutex<Vec<RequestDescriptor>>,
    reject_all: AtomicBool,
    unreachable: AtomicBool,
}

impl FakeTransport {
    /// Answer 401 to every request, whatever its credential
    pub(crate) fn reject_all(&self) {
        self.reject_all.store(true, Ordering::SeqCst);
    }

    pub(crate) fn go_offline(&self) {
        self.unreachable.store(true, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<RequestDescriptor> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<ResponseDescriptor, TransportError> {
        self.sent.lock().unwrap().push(request.clone());
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(TransportError::Network("connection refused".into()));
        }
        let response = match request.bearer_token() {
            Some(_) if request.url.ends_with("/admin") => ResponseDescriptor::new(403, "forbidden"),
            Some(token) if token.starts_with("fresh-") && !self.reject_all.load(Ordering::SeqCst) => {
                ResponseDescriptor::new(200, format!("ok {}", token))
            }
            _ => ResponseDescriptor::new(401, "unauthorized"),
        };
        Ok(response)
    }
}

/// In-memory persistence sink
#[derive(Default)]
pub(crate) struct MemorySink {
    current: Mutex<Option<Session>>,
    saves: AtomicUsize,
    failing: bool,
}

impl MemorySink {
    pub(crate) fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub(crate) fn with_session(session: Session) -> Self {
        Self {
            current: Mutex::new(Some(session)),
            ..Self::default()
        }
    }

    pub(crate) fn current(&self) -> Option<Session> {
        self.current.lock().unwrap().clone()
    }

    pub(crate) fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl PersistenceSink for MemorySink {
    fn save(&self, session: &Session) -> Result<()> {
        if self.failing {
            return Err(anyhow!("disk full"));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.current.lock().unwrap() = Some(session.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<Session>> {
        Ok(self.current.lock().unwrap().clone())
    }

    fn clear(&self) -> Result<()> {
        *self.current.lock().unwrap() = None;
        Ok(())
    }
}
