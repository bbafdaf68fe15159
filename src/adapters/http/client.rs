//! reqwest-backed request executor.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::models::{HttpClientConfig, HttpMethod, RawResponse, RequestSpec};
use crate::domain::ports::RequestExecutor;

/// Sends requests with a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestExecutor {
    client: reqwest::Client,
}

impl ReqwestExecutor {
    pub fn new(config: &HttpClientConfig) -> CacheResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| CacheError::FetchFailed(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RequestExecutor for ReqwestExecutor {
    async fn execute(&self, request: &RequestSpec) -> CacheResult<RawResponse> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        };
        let mut builder = self.client.request(method, &request.url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(method = %request.method, url = %request.url, "sending request");
        let response = builder.send().await?;
        let status = response.status();
        let url = response.url().to_string();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CacheError::FetchFailed(format!(
                "{} {url} returned {status}: {text}",
                request.method
            )));
        }

        let bytes = response.bytes().await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };

        Ok(RawResponse {
            status: status.as_u16(),
            url,
            body,
        })
    }
}
