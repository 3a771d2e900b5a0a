//! Operator endpoints over one or more caches.
//!
//! Mounted under a base path (default `/__cache`):
//!
//! - `GET {base}/stats`: counters summed over every registered cache
//! - `POST {base}/invalidate` with `{"pattern": "..."}`
//! - `POST {base}/clear`

use crate::config::DEFAULT_ADMIN_PATH;
use crate::service::ResponseCache;
use crate::stats::CacheStats;
use async_trait::async_trait;
use gatecache_core::{Error, HttpRequest, HttpResponse, Middleware, Next};
use serde_json::{Value, json};
use tracing::info;

/// Administrative router for a set of named caches.
#[derive(Clone)]
pub struct CacheAdmin {
    base_path: String,
    caches: Vec<(String, ResponseCache)>,
}

impl Default for CacheAdmin {
    fn default() -> Self {
        Self::new(DEFAULT_ADMIN_PATH)
    }
}

impl CacheAdmin {
    pub fn new(base_path: impl Into<String>) -> Self {
        let base_path = base_path.into();
        Self {
            base_path: base_path.trim_end_matches('/').to_string(),
            caches: Vec::new(),
        }
    }

    /// Register a cache under `name`.
    pub fn with_cache(mut self, name: impl Into<String>, cache: ResponseCache) -> Self {
        self.caches.push((name.into(), cache));
        self
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn cache_names(&self) -> impl Iterator<Item = &str> {
        self.caches.iter().map(|(name, _)| name.as_str())
    }

    /// Whether `path` falls under the admin mount point.
    pub fn matches(&self, path: &str) -> bool {
        path == self.base_path
            || path
                .strip_prefix(self.base_path.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Counters summed over every registered cache.
    pub async fn stats(&self) -> CacheStats {
        let mut total = CacheStats::default();
        for (_, cache) in &self.caches {
            total = total.merge(cache.stats().await);
        }
        total
    }

    /// Invalidate `pattern` in every registered cache.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let mut count = 0;
        for (_, cache) in &self.caches {
            count += cache.invalidate_pattern(pattern).await;
        }
        count
    }

    /// Clear every registered cache.
    pub async fn clear(&self) {
        for (_, cache) in &self.caches {
            cache.clear().await;
        }
    }

    /// Answer an admin request.
    pub async fn route(&self, req: &HttpRequest) -> HttpResponse {
        let action = req
            .path
            .strip_prefix(self.base_path.as_str())
            .unwrap_or_default()
            .trim_end_matches('/');

        let result = match (action, req.method.to_ascii_uppercase().as_str()) {
            ("/stats", "GET") => self.stats_response().await,
            ("/invalidate", "POST") => self.invalidate_response(req).await,
            ("/clear", "POST") => self.clear_response().await,
            ("/stats", _) | ("/invalidate", _) | ("/clear", _) => {
                Err(Error::MethodNotAllowed(req.method.clone()))
            }
            _ => Err(Error::NotFound(req.path.clone())),
        };

        result.unwrap_or_else(Error::into_response)
    }

    async fn stats_response(&self) -> Result<HttpResponse, Error> {
        HttpResponse::ok().with_json(&self.stats().await)
    }

    async fn invalidate_response(&self, req: &HttpRequest) -> Result<HttpResponse, Error> {
        let body: Value = req
            .json()
            .map_err(|_| Error::BadRequest("body must be a JSON object".to_string()))?;
        let pattern = match body.get("pattern") {
            Some(Value::String(pattern)) => pattern.clone(),
            Some(_) => return Err(Error::BadRequest("pattern must be a string".to_string())),
            None => return Err(Error::BadRequest("pattern is required".to_string())),
        };

        let count = self.invalidate(&pattern).await;
        info!(pattern = %pattern, count, "Cache invalidated via admin endpoint");
        HttpResponse::ok().with_json(&json!({
            "pattern": pattern,
            "invalidatedCount": count,
        }))
    }

    async fn clear_response(&self) -> Result<HttpResponse, Error> {
        self.clear().await;
        info!(caches = self.caches.len(), "Caches cleared via admin endpoint");
        HttpResponse::ok().with_json(&json!({ "cleared": true }))
    }
}

#[async_trait]
impl Middleware for CacheAdmin {
    async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
        if self.matches(&req.path) {
            Ok(self.route(&req).await)
        } else {
            next(req).await
        }
    }
}
