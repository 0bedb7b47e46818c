//! `reqwest`-backed HTTP collaborator

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder};
use std::time::Duration;

use super::{HttpClient, PlatformError};

/// Async HTTP client shared by the remote poll and the telemetry push
#[derive(Debug, Clone)]
pub struct ReqwestHttp {
    client: Client,
}

impl ReqwestHttp {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("kiosk-watchdog/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    async fn execute(request: RequestBuilder) -> Result<String, PlatformError> {
        let response = request
            .send()
            .await
            .map_err(|e| PlatformError::Http(e.to_string()))?
            .error_for_status()
            .map_err(|e| PlatformError::Http(e.to_string()))?;

        response
            .text()
            .await
            .map_err(|e| PlatformError::Http(e.to_string()))
    }
}

fn with_headers(mut request: RequestBuilder, headers: &[(String, String)]) -> RequestBuilder {
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }
    request
}

#[async_trait]
impl HttpClient for ReqwestHttp {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<String, PlatformError> {
        Self::execute(with_headers(self.client.get(url), headers)).await
    }

    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        content_type: &str,
        body: String,
    ) -> Result<String, PlatformError> {
        let request = with_headers(self.client.post(url), headers)
            .header(CONTENT_TYPE, content_type)
            .body(body);
        Self::execute(request).await
    }
}
