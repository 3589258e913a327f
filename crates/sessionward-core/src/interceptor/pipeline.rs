use std::sync::Arc;

use crate::api::{RequestDescriptor, ResponseDescriptor, Transport};
use crate::auth::CredentialStore;
use crate::error::SessionError;
use crate::refresh::RefreshCoordinator;

use super::{RequestInterceptor, ResponseInterceptor};

/// Request stage, then transport, then response stage.
#[derive(Clone)]
pub struct AuthPipeline {
    request: RequestInterceptor,
    transport: Arc<dyn Transport>,
    response: ResponseInterceptor,
}

impl AuthPipeline {
    pub fn new(
        store: Arc<CredentialStore>,
        coordinator: RefreshCoordinator,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            request: RequestInterceptor::new(store),
            response: ResponseInterceptor::new(coordinator, Arc::clone(&transport)),
            transport,
        }
    }

    /// Send `request` with the current credential. At most two dispatches:
    /// the original and one replay after a refresh.
    pub async fn execute(&self, request: &RequestDescriptor) -> Result<ResponseDescriptor, SessionError> {
        let prepared = self.request.prepare(request);
        let response = self.transport.send(&prepared.request).await?;
        self.response.handle(prepared, response).await
    }
}
