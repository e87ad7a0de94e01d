use super::wire::{ResultsResponse, StartRequest, StatusResponse};
use crate::engine::ShardApi;
use crate::observability::FeedStats;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

/// HTTP client for one shard's API
#[derive(Clone)]
pub struct ShardClient {
    endpoint: String,
    http: reqwest::Client,
}

impl ShardClient {
    /// `endpoint` is the shard's base URL, e.g. `http://10.0.0.7:3030`
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(endpoint, reqwest::Client::new())
    }

    pub fn with_client(endpoint: impl Into<String>, http: reqwest::Client) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self { endpoint, http }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    async fn check(&self, path: &str, resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("{}{} returned {}: {}", self.endpoint, path, status, body.trim());
        }
        Ok(resp)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .http
            .get(self.url(path))
            .send()
            .await
            .with_context(|| format!("GET {}{} failed", self.endpoint, path))?;
        self.check(path, resp)
            .await?
            .json::<T>()
            .await
            .with_context(|| format!("invalid response from {}{}", self.endpoint, path))
    }
}

#[async_trait]
impl ShardApi for ShardClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn status(&self) -> Result<StatusResponse> {
        self.get_json("/api/status").await
    }

    async fn start(&self, req: StartRequest) -> Result<()> {
        let path = "/api/start";
        let resp = self
            .http
            .post(self.url(path))
            .json(&req)
            .send()
            .await
            .with_context(|| format!("POST {}{} failed", self.endpoint, path))?;
        self.check(path, resp).await?;
        Ok(())
    }

    async fn results(&self) -> Result<ResultsResponse> {
        self.get_json("/api/results").await
    }

    async fn feed_stats(&self) -> Result<BTreeMap<String, FeedStats>> {
        self.get_json("/api/feed-stats").await
    }
}
