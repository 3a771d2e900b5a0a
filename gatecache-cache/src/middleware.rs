//! Response caching middleware.

use crate::entry::CacheEntry;
use crate::headers::{
    CacheStatus, apply_cache_headers, apply_status, if_none_match, is_revalidation, wants_bypass,
};
use crate::revalidate::fetch_via;
use crate::service::{Lookup, ResponseCache};
use async_trait::async_trait;
use gatecache_core::{Error, HttpRequest, HttpResponse, Middleware, Next, Upstream};
use std::sync::Arc;
use tracing::debug;

/// Serves `GET`/`HEAD` responses from a [`ResponseCache`].
///
/// Stale entries are served immediately and refreshed in the background
/// through the configured [`Upstream`], or through the rest of the chain
/// when none is set.
#[derive(Clone)]
pub struct ResponseCacheMiddleware {
    cache: ResponseCache,
    upstream: Option<Arc<dyn Upstream>>,
}

impl ResponseCacheMiddleware {
    pub fn new(cache: ResponseCache) -> Self {
        Self {
            cache,
            upstream: None,
        }
    }

    /// Re-issue revalidation requests through `upstream`.
    pub fn with_upstream(mut self, upstream: Arc<dyn Upstream>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Build the response for an entry found in the store.
    fn serve(&self, req: &HttpRequest, entry: &CacheEntry, status: CacheStatus) -> HttpResponse {
        let config = self.cache.config();
        let age = entry.age_secs(self.cache.now());

        let mut response = if if_none_match(req, &entry.etag) {
            let mut not_modified = HttpResponse::not_modified();
            apply_cache_headers(&mut not_modified, config, Some(&entry.etag));
            not_modified.set_header("ETag", entry.etag.clone());
            not_modified
        } else {
            let mut full = entry.to_response();
            apply_cache_headers(&mut full, config, Some(&entry.etag));
            if is_head(req) {
                full.body.clear();
            }
            full
        };

        apply_status(&mut response, status, Some(age));
        response
    }
}

fn is_cacheable_method(req: &HttpRequest) -> bool {
    req.method.eq_ignore_ascii_case("GET") || is_head(req)
}

fn is_head(req: &HttpRequest) -> bool {
    req.method.eq_ignore_ascii_case("HEAD")
}

#[async_trait]
impl Middleware for ResponseCacheMiddleware {
    async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
        if !is_cacheable_method(&req) || is_revalidation(&req) {
            return next(req).await;
        }

        if wants_bypass(&req) || self.cache.config().excludes(&req) {
            debug!(path = %req.path, "Cache bypass");
            let mut response = next(req).await?;
            apply_status(&mut response, CacheStatus::Bypass, None);
            return Ok(response);
        }

        let key = self.cache.key_for(&req);
        match self.cache.lookup(&key).await {
            Lookup::Fresh(entry) => {
                debug!(key = %key, "Cache hit");
                self.cache.record_hit();
                Ok(self.serve(&req, &entry, CacheStatus::Hit))
            }
            Lookup::Stale(entry) => {
                debug!(key = %key, "Serving stale entry");
                self.cache.record_hit();
                let started = match &self.upstream {
                    Some(upstream) => {
                        self.cache
                            .revalidate(&key, &req, fetch_via(upstream.clone()))
                            .await
                    }
                    None => self.cache.revalidate(&key, &req, next).await,
                };
                if started {
                    debug!(key = %key, "Revalidation started");
                }
                Ok(self.serve(&req, &entry, CacheStatus::Stale))
            }
            Lookup::Miss => {
                debug!(key = %key, "Cache miss");
                self.cache.record_miss();
                let mut response = next(req).await?;
                let stored = self.cache.store_response(&key, &response).await;
                apply_cache_headers(
                    &mut response,
                    self.cache.config(),
                    stored.as_ref().map(|entry| entry.etag.as_str()),
                );
                apply_status(&mut response, CacheStatus::Miss, None);
                Ok(response)
            }
        }
    }
}
