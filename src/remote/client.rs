// ABOUTME: HTTP client for the Sults workspace API
// ABOUTME: Sends authenticated JSON requests and unwraps the data envelope

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use super::RemoteSource;

/// Every listing endpoint wraps its items in this envelope.
#[derive(Debug, Deserialize)]
struct DataEnvelope {
    #[serde(default)]
    data: Vec<Value>,
}

pub struct ApiClient {
    client: Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn get_items(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<Value>> {
        let url = format!("{}/{}", self.base_url, path);

        let response = self
            .client
            .get(&url)
            .header("Authorization", &self.token)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Request to {url} failed"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Request to {url} returned {status}: {body}");
        }

        let envelope: DataEnvelope = response
            .json()
            .await
            .with_context(|| format!("Failed to parse the response body from {url}"))?;

        Ok(envelope.data)
    }
}

impl RemoteSource for ApiClient {
    async fn fetch_page(&self, path: &str, start: u32) -> Result<Vec<Value>> {
        self.get_items(path, &[("start", start.to_string())]).await
    }

    async fn fetch_children(&self, path: &str) -> Result<Vec<Value>> {
        self.get_items(path, &[]).await
    }
}
