//! Request/response descriptors and the `Transport` seam.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::TransportError;

/// Name of the header carrying the access credential
pub const AUTHORIZATION: &str = "Authorization";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    fn to_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbound request, independent of any HTTP library.
///
/// Cheap to clone so the auth pipeline can keep the original around for a
/// replay after a credential refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    /// Build a POST request with a JSON body
    pub fn post_json<B: Serialize>(url: impl Into<String>, body: &B) -> Result<Self, TransportError> {
        let body = serde_json::to_string(body)
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        Ok(Self::new(Method::Post, url)
            .with_header("Content-Type", "application/json")
            .with_body(body))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Look up a header value (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Set a header, replacing any existing value with the same name
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    /// Copy of this request carrying `token` as its bearer credential
    pub fn with_bearer(&self, token: &str) -> Self {
        let mut request = self.clone();
        request.set_header(AUTHORIZATION, format!("Bearer {}", token));
        request
    }

    /// The bearer token currently attached, if any
    pub fn bearer_token(&self) -> Option<&str> {
        self.header(AUTHORIZATION)
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

impl fmt::Debug for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(n, v)| {
                if n.eq_ignore_ascii_case(AUTHORIZATION) {
                    (n.as_str(), "<redacted>")
                } else {
                    (n.as_str(), v.as_str())
                }
            })
            .collect();
        f.debug_struct("RequestDescriptor")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &headers)
            .field("body_len", &self.body.as_ref().map(|b| b.len()))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseDescriptor {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl ResponseDescriptor {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Dispatches a request and returns whatever the server answered.
///
/// Non-2xx statuses are responses, not errors; only failing to get a
/// response at all is a `TransportError`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &RequestDescriptor) -> Result<ResponseDescriptor, TransportError>;
}

/// reqwest-backed transport.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Share an existing client (and its connection pool)
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<ResponseDescriptor, TransportError> {
        let mut builder = self
            .client
            .request(request.method.to_reqwest(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(n, v)| v.to_str().ok().map(|v| (n.to_string(), v.to_string())))
            .collect();
        let body = response.text().await?;
        debug!(method = %request.method, url = %request.url, status, "Response received");

        Ok(ResponseDescriptor {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_header_replaces_case_insensitively() {
        let mut request = RequestDescriptor::get("https://api.example.test/items")
            .with_header("authorization", "Bearer old");
        request.set_header("Authorization", "Bearer new");

        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.bearer_token(), Some("new"));
    }

    #[test]
    fn test_with_bearer_leaves_original_untouched() {
        let original = RequestDescriptor::get("https://api.example.test/items");
        let authed = original.with_bearer("abc");

        assert_eq!(original.bearer_token(), None);
        assert_eq!(authed.bearer_token(), Some("abc"));
        assert_eq!(authed.url, original.url);
    }

    #[test]
    fn test_debug_redacts_authorization() {
        let request = RequestDescriptor::get("https://api.example.test").with_bearer("secret-token");
        let rendered = format!("{:?}", request);
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_post_json_sets_content_type() {
        let request =
            RequestDescriptor::post_json("https://api.example.test", &serde_json::json!({"a": 1}))
                .expect("serializable body");
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.body.as_deref(), Some(r#"{"a":1}"#));
    }

    #[test]
    fn test_response_success_range() {
        assert!(ResponseDescriptor::new(204, "").is_success());
        assert!(!ResponseDescriptor::new(401, "").is_success());
        assert!(!ResponseDescriptor::new(302, "").is_success());
    }
}
