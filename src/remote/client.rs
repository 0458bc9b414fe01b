//! HTTP implementation of the remote API.

use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tracing::debug;

use super::{ApiRequest, HttpMethod};
use crate::config::ApiConfig;
use crate::error::StudySyncError;

const MAX_LOG_BODY_CHARS: usize = 256;
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Performs create/update/delete calls against the backend.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Send one request. Any 2xx response is success.
    async fn send(&self, request: ApiRequest) -> Result<(), StudySyncError>;
}

/// Remote API over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemoteApi {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpRemoteApi {
    /// Create a client from API settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ApiConfig) -> Result<Self, StudySyncError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StudySyncError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    fn headers(&self, idempotency_key: &str) -> Result<HeaderMap, StudySyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let key = HeaderValue::from_str(idempotency_key)
            .map_err(|_| StudySyncError::InvalidInput(format!("Invalid operation id: {idempotency_key}")))?;
        headers.insert(IDEMPOTENCY_HEADER, key);

        if let Some(token) = &self.auth_token {
            let auth = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| StudySyncError::Config("Invalid auth token format".to_string()))?;
            headers.insert(AUTHORIZATION, auth);
        }

        Ok(headers)
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn send(&self, request: ApiRequest) -> Result<(), StudySyncError> {
        let url = self.url(&request.endpoint);
        let builder = match request.method {
            HttpMethod::Post => self.client.post(&url),
            HttpMethod::Patch => self.client.patch(&url),
            HttpMethod::Delete => self.client.delete(&url),
        };

        let mut builder = builder.headers(self.headers(&request.idempotency_key)?);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(method = %request.method, %url, "sending request");
        let response = builder.send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let mut preview: String = body.chars().take(MAX_LOG_BODY_CHARS).collect();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!(status = status.as_u16(), body = %preview, "request failed");

        Err(StudySyncError::http(status.as_u16(), preview))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> HttpRemoteApi {
        HttpRemoteApi::new(&ApiConfig {
            base_url: base_url.to_string(),
            auth_token: Some("secret".to_string()),
            timeout_secs: 1,
        })
        .unwrap()
    }

    #[test]
    fn test_url_joins_endpoint() {
        let api = client("https://backend.example.edu/rest/v1/");
        assert_eq!(api.url("/tasks/4"), "https://backend.example.edu/rest/v1/tasks/4");
        assert_eq!(api.url("routines"), "https://backend.example.edu/rest/v1/routines");
    }

    #[test]
    fn test_headers() {
        let api = client("https://backend.example.edu");
        let headers = api.headers("task-1-abc123").unwrap();

        assert_eq!(headers.get(IDEMPOTENCY_HEADER).unwrap(), "task-1-abc123");
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer secret");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_connectivity_error() {
        // Port 9 (discard) on localhost is closed on test machines.
        let api = client("http://127.0.0.1:9");
        let err = api
            .send(ApiRequest {
                method: HttpMethod::Delete,
                endpoint: "/tasks/1".to_string(),
                body: None,
                idempotency_key: "task-1-abc123".to_string(),
            })
            .await
            .unwrap_err();

        assert!(err.is_connectivity(), "unexpected error: {err}");
    }
}
