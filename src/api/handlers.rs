//! API Handlers
//!
//! HTTP request handlers for the cache admin endpoints and the caching proxy.

use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::Method,
    Json,
};
use serde_json::Value;
use tracing::debug;

use crate::cache::{CacheHooks, CacheService};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    ClearResponse, DeleteResponse, GetResponse, HealthResponse, PrefixDeleteResponse, SetRequest,
    SetResponse, StatsResponse,
};
use crate::upstream::UpstreamClient;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Shared request cache
    pub cache: CacheService,
    /// Upstream backend; `/api/*` answers 404 without one
    pub upstream: Option<UpstreamClient>,
}

impl AppState {
    pub fn new(cache: CacheService) -> Self {
        Self {
            cache,
            upstream: None,
        }
    }

    pub fn with_upstream(mut self, upstream: UpstreamClient) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Opens the cache (restoring persisted entries) and the upstream client.
    pub async fn from_config(config: &Config, hooks: CacheHooks) -> Self {
        let cache = CacheService::from_config(config.cache.clone(), hooks).await;
        let state = Self::new(cache);
        match &config.upstream_url {
            Some(url) => state.with_upstream(UpstreamClient::new(url.as_str())),
            None => state,
        }
    }

    fn upstream(&self) -> Result<&UpstreamClient> {
        self.upstream
            .as_ref()
            .ok_or_else(|| CacheError::NotFound("no upstream configured".to_string()))
    }
}

/// Handler for PUT /entries
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let ttl = req.ttl();
    state.cache.set_value(&req.key, req.value, ttl).await;

    Ok(Json(SetResponse::new(req.key)))
}

/// Handler for GET /entries/:key
///
/// Counts as a hit or miss like any other read.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    match state.cache.get_value(&key).await {
        Some(value) => Ok(Json(GetResponse::new(key, value))),
        None => Err(CacheError::NotFound(key)),
    }
}

/// Handler for DELETE /entries/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Json<DeleteResponse> {
    state.cache.delete(&key).await;
    Json(DeleteResponse::new(key))
}

/// Handler for DELETE /prefix/:prefix
pub async fn delete_prefix_handler(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
) -> Json<PrefixDeleteResponse> {
    let removed = state.cache.delete_by_prefix(&prefix).await;
    Json(PrefixDeleteResponse { prefix, removed })
}

/// Handler for POST /clear
pub async fn clear_handler(State(state): State<AppState>) -> Json<ClearResponse> {
    state.cache.clear().await;
    Json(ClearResponse::cleared())
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let cache = &state.cache;
    let response = StatsResponse::new(
        cache.stats().await,
        cache.size().await,
        cache.memory_usage().await,
    )
    .with_activity(cache.in_flight(), cache.pending_batches());

    Json(response)
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

/// Cache key for a proxied read: `path` or `path|query`.
pub fn proxy_cache_key(path: &str, query: Option<&str>) -> String {
    let path = path.trim_matches('/');
    match query.filter(|q| !q.is_empty()) {
        Some(query) => format!("{}|{}", path, query),
        None => path.to_string(),
    }
}

/// Resource touched by a write: the first path segment.
pub fn resource_name(path: &str) -> &str {
    path.trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or_default()
}

/// Drops every cached read of `resource`: the bare key plus keys continuing
/// with `/` or `|`. `sets` never matches `settings|...`.
async fn invalidate_resource(cache: &CacheService, resource: &str) -> usize {
    let mut removed = 0;
    for prefix in [format!("{}/", resource), format!("{}|", resource)] {
        removed += cache.delete_by_prefix(&prefix).await;
    }
    if cache.has(resource).await {
        removed += 1;
    }
    cache.delete(resource).await;
    removed
}

/// Handler for GET /api/*path
///
/// Served from cache; misses fetch from upstream through `get_or_set`, so
/// concurrent identical reads share one upstream call.
pub async fn proxy_read_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Json<Value>> {
    let upstream = state.upstream()?.clone();
    let key = proxy_cache_key(&path, query.as_deref());

    let value = state
        .cache
        .get_or_set(
            &key,
            move || async move { upstream.get(&path, query.as_deref()).await },
            None,
        )
        .await?;

    Ok(Json(value))
}

/// Handler for POST/PUT/PATCH/DELETE /api/*path
///
/// Forwards the write, then drops every cached read of the same resource.
pub async fn proxy_write_handler(
    State(state): State<AppState>,
    method: Method,
    Path(path): Path<String>,
    body: Bytes,
) -> Result<Json<Value>> {
    let upstream = state.upstream()?;
    let body = if body.is_empty() {
        None
    } else {
        Some(
            serde_json::from_slice::<Value>(&body)
                .map_err(|e| CacheError::InvalidRequest(format!("invalid JSON body: {}", e)))?,
        )
    };

    let value = upstream.send(method, &path, None, body).await?;

    let resource = resource_name(&path);
    if !resource.is_empty() {
        let removed = invalidate_resource(&state.cache, resource).await;
        debug!(resource = %resource, removed, "Write invalidated cached reads");
    }

    Ok(Json(value))
}
