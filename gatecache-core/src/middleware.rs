// Middleware system for request/response processing

use crate::{Error, HttpRequest, HttpResponse};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, trace};

/// Type alias for the next handler in the middleware chain
pub type Next = Box<
    dyn FnOnce(HttpRequest) -> Pin<Box<dyn Future<Output = Result<HttpResponse, Error>> + Send>>
        + Send,
>;

/// Type alias for handler functions
pub type HandlerFn = Arc<
    dyn Fn(HttpRequest) -> Pin<Box<dyn Future<Output = Result<HttpResponse, Error>> + Send>>
        + Send
        + Sync,
>;

/// Wrap an async closure into a [`HandlerFn`].
///
/// ```
/// use gatecache_core::{handler, HttpResponse};
///
/// let origin = handler(|_req| async { Ok(HttpResponse::ok().with_body("hi")) });
/// # let _ = origin;
/// ```
pub fn handler<F, Fut>(f: F) -> HandlerFn
where
    F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
{
    Arc::new(move |req| Box::pin(f(req)))
}

/// Middleware trait for processing requests before they reach the handler
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Process the request and optionally pass to next middleware
    async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error>;
}

#[async_trait]
impl<M: Middleware + ?Sized> Middleware for Arc<M> {
    async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
        (**self).handle(req, next).await
    }
}

/// Middleware chain executor
#[derive(Clone)]
pub struct MiddlewareChain {
    middlewares: Arc<Vec<Arc<dyn Middleware>>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self {
            middlewares: Arc::new(Vec::new()),
        }
    }

    /// Add a middleware to the chain
    pub fn use_middleware<M: Middleware + 'static>(&mut self, middleware: M) {
        let mut mws = (*self.middlewares).clone();
        mws.push(Arc::new(middleware));
        self.middlewares = Arc::new(mws);
    }

    /// Builder-style variant of [`MiddlewareChain::use_middleware`].
    pub fn with<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.use_middleware(middleware);
        self
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Execute the middleware chain with a handler
    pub async fn apply(&self, req: HttpRequest, handler: HandlerFn) -> Result<HttpResponse, Error> {
        debug!(
            middleware_count = self.middlewares.len(),
            path = %req.path,
            method = %req.method,
            "Executing middleware chain"
        );
        self.execute_from(0, req, handler).await
    }

    fn execute_from(
        &self,
        index: usize,
        req: HttpRequest,
        handler: HandlerFn,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, Error>> + Send>> {
        if index >= self.middlewares.len() {
            trace!("Middleware chain complete, calling handler");
            handler(req)
        } else {
            let middleware = self.middlewares[index].clone();
            let chain = self.clone();
            let handler_clone = handler.clone();

            trace!(middleware_index = index, "Executing middleware");
            Box::pin(async move {
                middleware
                    .handle(
                        req,
                        Box::new(move |req| chain.execute_from(index + 1, req, handler_clone)),
                    )
                    .await
            })
        }
    }
}

impl Default for MiddlewareChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TagMiddleware(&'static str);

    #[async_trait]
    impl Middleware for TagMiddleware {
        async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
            let mut response = next(req).await?;
            let tags = match response.header("X-Tags") {
                Some(existing) => format!("{},{}", existing, self.0),
                None => self.0.to_string(),
            };
            response.set_header("X-Tags", tags);
            Ok(response)
        }
    }

    #[tokio::test]
    async fn test_chain_runs_in_order() {
        let chain = MiddlewareChain::new()
            .with(TagMiddleware("outer"))
            .with(TagMiddleware("inner"));
        let origin = handler(|_req| async { Ok(HttpResponse::ok()) });

        let response = chain.apply(HttpRequest::get("/"), origin).await.unwrap();
        // Inner middleware wraps the handler first.
        assert_eq!(response.header("X-Tags"), Some("inner,outer"));
    }

    #[tokio::test]
    async fn test_empty_chain_calls_handler() {
        let chain = MiddlewareChain::default();
        assert!(chain.is_empty());
        let origin = handler(|req| async move { Ok(HttpResponse::ok().with_body(req.path)) });

        let response = chain.apply(HttpRequest::get("/ping"), origin).await.unwrap();
        assert_eq!(response.body, b"/ping".to_vec());
    }
}
