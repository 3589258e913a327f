use std::sync::Arc;

use tracing::trace;

use crate::api::RequestDescriptor;
use crate::auth::CredentialStore;

/// A request ready for dispatch, plus the access token it carries.
///
/// The response stage compares `attached_token` with the store to tell
/// whether a refresh already superseded it.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub request: RequestDescriptor,
    pub attached_token: Option<String>,
}

/// Attaches the current access credential to outbound requests. Never
/// refreshes; an expired token is sent as-is and handled on the way back.
#[derive(Clone)]
pub struct RequestInterceptor {
    store: Arc<CredentialStore>,
}

impl RequestInterceptor {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self { store }
    }

    pub fn prepare(&self, request: &RequestDescriptor) -> PreparedRequest {
        match self.store.get() {
            Some(session) => {
                let token = session.credential.access_token();
                trace!(url = %request.url, generation = session.generation(), "Attaching credential");
                PreparedRequest {
                    request: request.with_bearer(token),
                    attached_token: Some(token.to_string()),
                }
            }
            None => {
                trace!(url = %request.url, "No session; sending unauthenticated");
                PreparedRequest {
                    request: request.clone(),
                    attached_token: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fresh_session;

    #[test]
    fn test_attaches_bearer_token() {
        let store = Arc::new(CredentialStore::new());
        store.replace(fresh_session("fresh-token"));
        let interceptor = RequestInterceptor::new(store);

        let prepared = interceptor.prepare(&RequestDescriptor::get("https://api.test/items"));
        assert_eq!(prepared.request.bearer_token(), Some("fresh-token"));
        assert_eq!(prepared.attached_token.as_deref(), Some("fresh-token"));
    }

    #[test]
    fn test_forwards_unauthenticated_without_session() {
        let interceptor = RequestInterceptor::new(Arc::new(CredentialStore::new()));
        let original = RequestDescriptor::get("https://api.test/public");

        let prepared = interceptor.prepare(&original);
        assert_eq!(prepared.request, original);
        assert!(prepared.attached_token.is_none());
    }

    #[test]
    fn test_replaces_caller_supplied_authorization() {
        let store = Arc::new(CredentialStore::new());
        store.replace(fresh_session("fresh-token"));
        let interceptor = RequestInterceptor::new(store);

        let request = RequestDescriptor::get("https://api.test/items")
            .with_header("authorization", "Bearer something-else");
        let prepared = interceptor.prepare(&request);
        assert_eq!(prepared.request.bearer_token(), Some("fresh-token"));
        assert_eq!(prepared.request.headers.len(), 1);
    }
}
