// Core HTTP primitives for the gatecache gateway layer.
// Holds the request/response descriptors, the middleware seam the cache
// plugs into, the upstream seam it re-issues requests through, and logging.

pub mod error;
pub mod http;
pub mod logging;
pub mod middleware;
pub mod upstream;

pub use error::*;
pub use http::*;
pub use middleware::*;
pub use upstream::*;
