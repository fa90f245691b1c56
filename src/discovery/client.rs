use super::types::{InstanceQuery, RegistrationRequest};
use crate::error::{DiscoveryError, Result};
use async_trait::async_trait;
use http::StatusCode;
use std::time::Duration;

/// Per-call timeout applied to every backend request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(1500);

/// Raw reply from the discovery backend. Status interpretation is left to the
/// caller since register, heartbeat and list treat codes differently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendResponse {
    pub status: StatusCode,
    pub body: String,
}

impl BackendResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Turn a non-200 reply into a `Status` error, keeping the body.
    pub fn require_ok(self) -> Result<String> {
        if self.status == StatusCode::OK {
            Ok(self.body)
        } else {
            Err(DiscoveryError::Status {
                status: self.status.as_u16(),
                body: self.body,
            })
        }
    }
}

/// Wire operations of the discovery backend.
///
/// Implementations return `Err(Transient)` only for transport failures; any
/// HTTP reply, including error statuses, comes back as `Ok(BackendResponse)`.
#[async_trait]
pub trait DiscoveryBackend: Send + Sync {
    /// `POST /api/v1/instances`
    async fn register(&self, registration: &RegistrationRequest) -> Result<BackendResponse>;

    /// `PUT` on the heartbeat link returned at registration.
    async fn heartbeat(&self, heartbeat_link: &str) -> Result<BackendResponse>;

    /// `GET /api/v1/instances?service_name=..`
    async fn list_instances(&self, query: &InstanceQuery) -> Result<BackendResponse>;

    /// `DELETE` on the self link returned at registration.
    async fn deregister(&self, self_link: &str) -> Result<BackendResponse>;
}

/// Discovery backend HTTP client.
#[derive(Clone)]
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
    token: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let base_url = if base_url.starts_with("http://") || base_url.starts_with("https://") {
            base_url.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", base_url.trim_end_matches('/'))
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| DiscoveryError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            client,
            token: token.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.bearer_auth(&self.token)
    }

    /// Links may come back absolute or relative to the backend root.
    pub fn resolve_link(&self, link: &str) -> String {
        if link.starts_with("http://") || link.starts_with("https://") {
            link.to_string()
        } else if link.starts_with('/') {
            format!("{}{}", self.base_url, link)
        } else {
            format!("{}/{}", self.base_url, link)
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<BackendResponse> {
        let resp = self.authed(req).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        Ok(BackendResponse { status, body })
    }
}

#[async_trait]
impl DiscoveryBackend for HttpBackend {
    async fn register(&self, registration: &RegistrationRequest) -> Result<BackendResponse> {
        let url = format!("{}/api/v1/instances", self.base_url);
        self.send(self.client.post(&url).json(registration)).await
    }

    async fn heartbeat(&self, heartbeat_link: &str) -> Result<BackendResponse> {
        let url = self.resolve_link(heartbeat_link);
        self.send(self.client.put(&url)).await
    }

    async fn list_instances(&self, query: &InstanceQuery) -> Result<BackendResponse> {
        let url = format!("{}/api/v1/instances", self.base_url);
        self.send(self.client.get(&url).query(&query.query_pairs()))
            .await
    }

    async fn deregister(&self, self_link: &str) -> Result<BackendResponse> {
        let url = self.resolve_link(self_link);
        self.send(self.client.delete(&url)).await
    }
}
