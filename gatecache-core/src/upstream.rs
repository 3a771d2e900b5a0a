//! Upstream seam used to re-issue a request internally.
//!
//! The caching layer never routes requests itself. When it needs a fresh
//! copy of a response it hands a rebuilt request to an [`Upstream`], which
//! is usually the gateway's origin handler or its full middleware chain.

use crate::{Error, HandlerFn, HttpRequest, HttpResponse, MiddlewareChain};
use async_trait::async_trait;

/// Something that can answer an HTTP request.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Dispatch the request and return the upstream response.
    async fn dispatch(&self, req: HttpRequest) -> Result<HttpResponse, Error>;
}

#[async_trait]
impl Upstream for HandlerFn {
    async fn dispatch(&self, req: HttpRequest) -> Result<HttpResponse, Error> {
        (**self)(req).await
    }
}

/// Dispatches through a middleware chain in front of a handler.
///
/// Requests issued this way pass through every middleware, including the
/// caching middleware, which recognizes revalidation requests by their
/// marker header and forwards them untouched.
#[derive(Clone)]
pub struct ChainUpstream {
    chain: MiddlewareChain,
    handler: HandlerFn,
}

impl ChainUpstream {
    pub fn new(chain: MiddlewareChain, handler: HandlerFn) -> Self {
        Self { chain, handler }
    }
}

#[async_trait]
impl Upstream for ChainUpstream {
    async fn dispatch(&self, req: HttpRequest) -> Result<HttpResponse, Error> {
        self.chain.apply(req, self.handler.clone()).await
    }
}
