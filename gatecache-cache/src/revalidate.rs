//! Background refresh of stale entries.

use crate::headers::{X_CACHE_REVALIDATE, is_storable};
use crate::service::ResponseCache;
use gatecache_core::{Error, HttpRequest, HttpResponse, Upstream};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

/// Request headers never forwarded on a background refresh.
pub const SENSITIVE_HEADERS: &[&str] =
    &["authorization", "cookie", "proxy-authorization", "x-api-key"];

/// The pending upstream call of a refresh.
pub type RevalidationFuture = Pin<Box<dyn Future<Output = Result<HttpResponse, Error>> + Send>>;

/// Build the internal request used to refresh `original`.
///
/// Same method, path and query; credentials stripped; marked with
/// `X-Cache-Revalidate: true` so the caching middleware forwards it
/// untouched.
pub fn revalidation_request(original: &HttpRequest) -> HttpRequest {
    let mut request = HttpRequest::new(original.method.clone(), original.path.clone());
    request.query_params = original.query_params.clone();
    request.headers = original
        .headers
        .iter()
        .filter(|(name, _)| {
            !SENSITIVE_HEADERS
                .iter()
                .any(|sensitive| name.eq_ignore_ascii_case(sensitive))
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    request.remove_header("if-none-match");
    request.remove_header("cache-control");
    request
        .headers
        .insert(X_CACHE_REVALIDATE.to_string(), "true".to_string());
    request
}

/// Adapt an [`Upstream`] into a refresh fetcher.
pub fn fetch_via(
    upstream: Arc<dyn Upstream>,
) -> impl FnOnce(HttpRequest) -> RevalidationFuture + Send + 'static {
    move |req: HttpRequest| -> RevalidationFuture {
        Box::pin(async move { upstream.dispatch(req).await })
    }
}

impl ResponseCache {
    /// Refresh `key` in the background unless another holder already is.
    ///
    /// Only the lease acquisition is awaited. The fetch runs on a detached
    /// task bounded by the revalidation timeout; the lease is released
    /// whatever the outcome and the entry is only rewritten from a storable
    /// response. Returns whether this call started a refresh.
    pub async fn revalidate<F>(&self, key: &str, original: &HttpRequest, fetch: F) -> bool
    where
        F: FnOnce(HttpRequest) -> RevalidationFuture + Send + 'static,
    {
        let Some(lease) = self.inner.leases.try_acquire(key).await else {
            debug!(key = %key, "Revalidation already in flight");
            return false;
        };

        let cache = self.clone();
        let key = key.to_string();
        let request = revalidation_request(original);
        let timeout = self.config().revalidation_timeout;

        tokio::spawn(async move {
            match tokio::time::timeout(timeout, fetch(request)).await {
                Ok(Ok(response)) if is_storable(&response, cache.config().max_body_bytes) => {
                    if cache.store_response(&key, &response).await.is_some() {
                        debug!(key = %key, "Revalidated cache entry");
                    }
                }
                Ok(Ok(response)) => {
                    warn!(key = %key, status = response.status, "Revalidation response not storable");
                }
                Ok(Err(e)) => {
                    warn!(key = %key, error = %e, "Revalidation request failed");
                }
                Err(_) => {
                    warn!(key = %key, timeout_ms = timeout.as_millis() as u64, "Revalidation timed out");
                }
            }
            cache.inner.leases.release(&lease).await;
        });

        true
    }
}
