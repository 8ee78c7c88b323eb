//! HTTP metrics source
//!
//! Polls a health-check endpoint returning a flat JSON object of numeric
//! signals, e.g. `{"latency_ms": 123.4, "error_rate": 0.01}`. Non-numeric
//! fields are skipped with a debug log rather than failing the fetch.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use reqwest::Client;
use url::Url;

use super::{async_trait, EndpointConfig, MetricsSource};

/// Metrics source backed by HTTP JSON health endpoints
pub struct HttpMetricsSource {
    client: Client,
}

impl HttpMetricsSource {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MetricsSource for HttpMetricsSource {
    async fn fetch(&self, endpoint: &EndpointConfig) -> Result<BTreeMap<String, f64>> {
        let url = Url::parse(&endpoint.url)
            .with_context(|| format!("Invalid endpoint URL: {}", endpoint.url))?;

        let response = self
            .client
            .get(url)
            .timeout(endpoint.timeout())
            .send()
            .await
            .with_context(|| format!("Failed to fetch endpoint {}", endpoint.name))?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("Endpoint {} returned {}", endpoint.name, status);
        }

        let body: BTreeMap<String, serde_json::Value> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", endpoint.name))?;

        let mut samples = BTreeMap::new();
        for (metric, value) in body {
            match value.as_f64() {
                Some(v) => {
                    samples.insert(metric, v);
                }
                None => {
                    tracing::debug!(
                        endpoint = %endpoint.name,
                        metric = %metric,
                        "Skipping non-numeric signal"
                    );
                }
            }
        }

        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_parses_numeric_signals() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/health")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"latency_ms": 120.5, "error_rate": 0.02, "status": "ok"}"#)
            .create_async()
            .await;

        let source = HttpMetricsSource::new().unwrap();
        let endpoint = EndpointConfig::new("api", format!("{}/health", server.url()));

        let samples = source.fetch(&endpoint).await.unwrap();
        mock.assert_async().await;

        assert_eq!(samples.len(), 2);
        assert_eq!(samples["latency_ms"], 120.5);
        assert_eq!(samples["error_rate"], 0.02);
    }

    #[tokio::test]
    async fn test_fetch_http_error_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_status(500)
            .create_async()
            .await;

        let source = HttpMetricsSource::new().unwrap();
        let endpoint = EndpointConfig::new("api", format!("{}/health", server.url()));

        let err = source.fetch(&endpoint).await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_fetch_invalid_url_is_reported() {
        let source = HttpMetricsSource::new().unwrap();
        let endpoint = EndpointConfig::new("bad", "not a url");

        let err = source.fetch(&endpoint).await.unwrap_err();
        assert!(err.to_string().contains("Invalid endpoint URL"));
    }
}
