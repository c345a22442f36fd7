//! Upstream REST client
//!
//! Thin reqwest wrapper over the flashcard backend. Its calls serve as the
//! fetchers behind cached reads.

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::error::{CacheError, Result};

/// HTTP client for the upstream backend.
#[derive(Clone, Debug)]
pub struct UpstreamClient {
    client: Client,
    base_url: String,
}

impl UpstreamClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Uses a preconfigured reqwest client (timeouts, headers).
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Builds the absolute URL for a path with optional raw query.
    pub fn url(&self, path: &str, query: Option<&str>) -> String {
        let path = path.trim_start_matches('/');
        match query.filter(|q| !q.is_empty()) {
            Some(query) => format!("{}/{}?{}", self.base_url, path, query),
            None => format!("{}/{}", self.base_url, path),
        }
    }

    pub async fn get(&self, path: &str, query: Option<&str>) -> Result<Value> {
        self.send(Method::GET, path, query, None).await
    }

    pub async fn post(&self, path: &str, body: Option<Value>) -> Result<Value> {
        self.send(Method::POST, path, None, body).await
    }

    pub async fn put(&self, path: &str, body: Option<Value>) -> Result<Value> {
        self.send(Method::PUT, path, None, body).await
    }

    pub async fn patch(&self, path: &str, body: Option<Value>) -> Result<Value> {
        self.send(Method::PATCH, path, None, body).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value> {
        self.send(Method::DELETE, path, None, None).await
    }

    /// Sends one request and decodes the JSON reply.
    ///
    /// Empty bodies (204 or zero-length 200) decode as `Value::Null`.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        body: Option<Value>,
    ) -> Result<Value> {
        let url = self.url(path, query);
        debug!(method = %method, url = %url, "Upstream request");

        let mut request = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(CacheError::fetch)?;
        let status = response.status();

        if !status.is_success() {
            return Err(CacheError::Fetch(format!(
                "{} {} returned {}",
                method, url, status
            )));
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }

        let bytes = response.bytes().await.map_err(CacheError::fetch)?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| CacheError::Fetch(format!("invalid JSON from {}: {}", url, e)))
    }
}
