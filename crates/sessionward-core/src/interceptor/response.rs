use std::sync::Arc;

use tracing::{debug, info, warn};

use super::PreparedRequest;
use crate::api::{ResponseDescriptor, Transport};
use crate::error::SessionError;
use crate::refresh::{RefreshCoordinator, RefreshFailure, RefreshOutcome};

/// How the pipeline treats a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// Handed to the caller untouched
    PassThrough,
    /// 401: the access credential is expired or invalid
    CredentialRejected,
    /// 403: the credential is fine but the action is not allowed
    PolicyDenied,
}

impl ResponseClass {
    pub fn of(response: &ResponseDescriptor) -> Self {
        match response.status {
            401 => ResponseClass::CredentialRejected,
            403 => ResponseClass::PolicyDenied,
            _ => ResponseClass::PassThrough,
        }
    }
}

/// Recovers from expired credentials: refresh once, replay once.
#[derive(Clone)]
pub struct ResponseInterceptor {
    coordinator: RefreshCoordinator,
    transport: Arc<dyn Transport>,
}

impl ResponseInterceptor {
    pub fn new(coordinator: RefreshCoordinator, transport: Arc<dyn Transport>) -> Self {
        Self {
            coordinator,
            transport,
        }
    }

    pub async fn handle(
        &self,
        prepared: PreparedRequest,
        response: ResponseDescriptor,
    ) -> Result<ResponseDescriptor, SessionError> {
        match ResponseClass::of(&response) {
            ResponseClass::PassThrough => Ok(response),
            ResponseClass::PolicyDenied => {
                debug!(url = %prepared.request.url, "Request denied by policy");
                Ok(response)
            }
            ResponseClass::CredentialRejected => self.recover(prepared, response).await,
        }
    }

    async fn recover(
        &self,
        prepared: PreparedRequest,
        response: ResponseDescriptor,
    ) -> Result<ResponseDescriptor, SessionError> {
        // Nothing to refresh for a request that carried no credential
        let Some(ref stale) = prepared.attached_token else {
            return Ok(response);
        };

        let credential = match self.coordinator.request_refresh_for(Some(stale.as_str())).await {
            RefreshOutcome::Success(credential) => credential,
            RefreshOutcome::Failure(RefreshFailure::Transient(detail)) => {
                return Err(SessionError::TransientRefreshFailure(detail))
            }
            RefreshOutcome::Failure(RefreshFailure::Terminal(reason)) => {
                info!(reason = %reason, "Session expired; request abandoned");
                return Err(SessionError::TerminalRefreshFailure(reason));
            }
        };

        let replay = prepared.request.with_bearer(credential.access_token());
        debug!(url = %replay.url, "Replaying request with refreshed credential");
        let replayed = self.transport.send(&replay).await?;

        if ResponseClass::of(&replayed) == ResponseClass::CredentialRejected {
            warn!(
                url = %replay.url,
                status = replayed.status,
                "Request rejected again after refresh"
            );
            return Err(SessionError::ReplayExhausted {
                response: Box::new(replayed),
            });
        }
        Ok(replayed)
    }
}
