use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::api::{ApiResponse, ContactRequest, LoopsApi};
use crate::error::LoopsError;

pub const DEFAULT_BASE_URL: &str = "https://app.loops.so/api/v1";

#[derive(Debug, Clone)]
pub struct LoopsClientConfig {
    pub api_key: String,

    /// API root without a trailing slash (default: [`DEFAULT_BASE_URL`]).
    pub base_url: String,

    /// Timeout applied to every request (default: 10 seconds).
    pub request_timeout: Duration,
}

impl LoopsClientConfig {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// HTTP implementation of [`LoopsApi`].
#[derive(Debug, Clone)]
pub struct LoopsClient {
    http_client: Client,
    api_key: String,
    base_url: String,
}

impl LoopsClient {
    /// Build a client. Fails when the API key or base URL is empty.
    pub fn new(config: LoopsClientConfig) -> Result<Self, LoopsError> {
        if config.api_key.is_empty() {
            return Err(LoopsError::InvalidConfig("api key is required".into()));
        }
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(LoopsError::InvalidConfig("base url is required".into()));
        }

        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| LoopsError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            api_key: config.api_key,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse, LoopsError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "sending Loops request");

        let response = self
            .http_client
            .request(method, &url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(LoopsError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| LoopsError::Decode(e.to_string()))
    }
}

#[async_trait]
impl LoopsApi for LoopsClient {
    async fn upsert_contact(&self, request: &ContactRequest) -> Result<ApiResponse, LoopsError> {
        self.send(Method::PUT, "/contacts/update", request).await
    }

    async fn delete_contact(&self, user_id: &str) -> Result<ApiResponse, LoopsError> {
        self.send(Method::POST, "/contacts/delete", &json!({ "userId": user_id }))
            .await
    }
}
