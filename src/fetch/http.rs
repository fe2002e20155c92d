use async_trait::async_trait;
use reqwest::Client;

use crate::config::ClientConfig;
use crate::error::{Context, FetchError};

use super::request::build_headers;
use super::FetchResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound HTTP capability. One call is one network round trip; retries live elsewhere.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn request(&self, url: &str, query: &[(String, String)]) -> FetchResult<HttpResponse>;
}

/// Default transport over a shared `reqwest` connection pool.
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    pub fn from_config(config: &ClientConfig) -> FetchResult<Self> {
        let headers = build_headers(&config.headers)?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()
            .context("Failed to construct ISS HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn request(&self, url: &str, query: &[(String, String)]) -> FetchResult<HttpResponse> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|err| {
                FetchError::transport(url, err.status().map(|s| s.as_u16()), err.to_string())
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| FetchError::transport(url, Some(status), err.to_string()))?;

        Ok(HttpResponse { status, body })
    }
}
