//! HTTP client for the identity service.
//!
//! Talks JSON to a small set of `/auth/*` endpoints and converts every
//! response into absolute-expiry [`TokenPair`]s.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    IdentityEndpoint, IdentityError, LoginCredentials, RegistrationDetails, RegistrationResult,
    TokenPair, TransportError,
};
use crate::error::SessionError;

// ============================================================================
// Constants
// ============================================================================

const LOGIN_PATH: &str = "auth/login";
const REFRESH_PATH: &str = "auth/refresh";
const REVOKE_PATH: &str = "auth/revoke";
const REGISTER_PATH: &str = "auth/register";
const ACTIVATE_PATH: &str = "auth/activate";
const SESSION_PATH: &str = "auth/session";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    refresh_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    refresh_expires_in: Option<i64>,
    #[serde(default)]
    subject_id: Option<String>,
}

impl TokenResponse {
    /// Resolve relative lifetimes against the instant the response arrived.
    fn into_token_pair(self, received_at: DateTime<Utc>) -> Result<TokenPair, IdentityError> {
        if self.access_token.is_empty() {
            return Err(IdentityError::InvalidResponse("empty access token".into()));
        }
        let access_expires_at = match (self.expires_at, self.expires_in) {
            (Some(at), _) => at,
            (None, Some(secs)) => received_at + chrono::Duration::seconds(secs),
            (None, None) => {
                return Err(IdentityError::InvalidResponse(
                    "token response carries no access expiry".into(),
                ))
            }
        };
        let refresh_expires_at = self.refresh_expires_at.or_else(|| {
            self.refresh_expires_in
                .map(|secs| received_at + chrono::Duration::seconds(secs))
        });

        Ok(TokenPair {
            access_token: self.access_token,
            access_expires_at,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            refresh_expires_at,
            subject_id: self.subject_id,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct ActivateRequest<'a> {
    token: &'a str,
}

/// reqwest-backed [`IdentityEndpoint`].
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpIdentityEndpoint {
    client: Client,
    base_url: Url,
}

impl HttpIdentityEndpoint {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SessionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::Configuration(format!("HTTP client: {}", e)))?;
        Self::with_client(client, base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Result<Self, SessionError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| SessionError::Configuration(format!("identity base URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(SessionError::Configuration(format!(
                "identity base URL cannot be a base: {}",
                base_url
            )));
        }
        // Url::join drops the last segment unless the path ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, IdentityError> {
        self.base_url
            .join(path)
            .map_err(|e| IdentityError::Transport(TransportError::InvalidRequest(e.to_string())))
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, IdentityError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(IdentityError::from_status(status, &body))
        }
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, IdentityError> {
        let url = self.endpoint(path)?;
        let response = self
            .client
            .post(url)
            .header(header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await
            .map_err(TransportError::from)?;
        Self::check_response(response).await
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, IdentityError> {
        response
            .json()
            .await
            .map_err(|e| IdentityError::InvalidResponse(e.to_string()))
    }

    async fn post_for_tokens<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<TokenPair, IdentityError> {
        let response = self.post(path, body).await?;
        let received_at = Utc::now();
        let tokens: TokenResponse = Self::parse(response).await?;
        tokens.into_token_pair(received_at)
    }
}

#[async_trait]
impl IdentityEndpoint for HttpIdentityEndpoint {
    async fn login(&self, credentials: &LoginCredentials) -> Result<TokenPair, IdentityError> {
        debug!(username = %credentials.username, "Sending login request");
        let body = LoginRequest {
            username: &credentials.username,
            password: credentials.password(),
        };
        self.post_for_tokens(LOGIN_PATH, &body).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, IdentityError> {
        self.post_for_tokens(REFRESH_PATH, &RefreshRequest { refresh_token })
            .await
    }

    async fn revoke(&self, refresh_token: &str) -> Result<(), IdentityError> {
        self.post(REVOKE_PATH, &RefreshRequest { refresh_token })
            .await?;
        info!("Refresh token revoked");
        Ok(())
    }

    async fn register(
        &self,
        details: &RegistrationDetails,
    ) -> Result<RegistrationResult, IdentityError> {
        let response = self.post(REGISTER_PATH, details).await?;
        Self::parse(response).await
    }

    async fn activate(&self, activation_token: &str) -> Result<(), IdentityError> {
        self.post(ACTIVATE_PATH, &ActivateRequest {
            token: activation_token,
        })
        .await?;
        Ok(())
    }

    async fn validate(&self, access_token: &str) -> Result<(), IdentityError> {
        let url = self.endpoint(SESSION_PATH)?;
        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(TransportError::from)?;
        Self::check_response(response).await?;
        Ok(())
    }
}
