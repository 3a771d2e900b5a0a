//! HTTP caching semantics: `Cache-Control`, `Vary`, `ETag` and the
//! observability headers attached to every cached route.

use crate::config::{CacheConfig, CacheScope, CdnPolicy};
use gatecache_core::{HttpRequest, HttpResponse};
use sha2::{Digest, Sha256};
use std::fmt;

pub const X_CACHE: &str = "X-Cache";
pub const X_CACHE_AGE: &str = "X-Cache-Age";
pub const X_CACHE_REVALIDATE: &str = "X-Cache-Revalidate";
pub const X_BYPASS_CACHE: &str = "X-Bypass-Cache";

/// Outcome of a cache lookup, reported in `X-Cache`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Stale,
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Stale => "STALE",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Individual cache directive from a Cache-Control header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDirective {
    Public,
    Private,
    NoStore,
    NoCache,
    MaxAge(u64),
    SMaxAge(u64),
    StaleWhileRevalidate(u64),
    Extension(String, Option<String>),
}

impl CacheDirective {
    /// Parse a single directive.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        if s.is_empty() {
            return None;
        }

        if let Some((key, value)) = s.split_once('=') {
            let key = key.trim();
            let value = value.trim().trim_matches('"');
            return match key {
                "max-age" => value.parse().ok().map(CacheDirective::MaxAge),
                "s-maxage" => value.parse().ok().map(CacheDirective::SMaxAge),
                "stale-while-revalidate" => {
                    value.parse().ok().map(CacheDirective::StaleWhileRevalidate)
                }
                _ => Some(CacheDirective::Extension(
                    key.to_string(),
                    Some(value.to_string()),
                )),
            };
        }

        match s.as_str() {
            "public" => Some(CacheDirective::Public),
            "private" => Some(CacheDirective::Private),
            "no-store" => Some(CacheDirective::NoStore),
            "no-cache" => Some(CacheDirective::NoCache),
            _ => Some(CacheDirective::Extension(s, None)),
        }
    }

    pub fn to_header_value(&self) -> String {
        match self {
            CacheDirective::Public => "public".to_string(),
            CacheDirective::Private => "private".to_string(),
            CacheDirective::NoStore => "no-store".to_string(),
            CacheDirective::NoCache => "no-cache".to_string(),
            CacheDirective::MaxAge(secs) => format!("max-age={}", secs),
            CacheDirective::SMaxAge(secs) => format!("s-maxage={}", secs),
            CacheDirective::StaleWhileRevalidate(secs) => {
                format!("stale-while-revalidate={}", secs)
            }
            CacheDirective::Extension(key, Some(value)) => format!("{}={}", key, value),
            CacheDirective::Extension(key, None) => key.clone(),
        }
    }
}

/// Parsed or constructed Cache-Control header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub directives: Vec<CacheDirective>,
}

impl CacheControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a Cache-Control header value.
    pub fn parse(header: &str) -> Self {
        Self {
            directives: header.split(',').filter_map(CacheDirective::parse).collect(),
        }
    }

    /// Downstream policy for a response with `status`.
    ///
    /// Errors are never cacheable downstream, whatever the policy says.
    pub fn for_status(policy: Option<&CdnPolicy>, status: u16) -> Option<Self> {
        if status >= 400 {
            return Some(Self::new().directive(CacheDirective::NoStore));
        }
        let policy = policy?;
        if policy.no_store {
            return Some(Self::new().directive(CacheDirective::NoStore));
        }

        let mut cc = Self::new().directive(match policy.scope {
            CacheScope::Public => CacheDirective::Public,
            CacheScope::Private => CacheDirective::Private,
        });
        if let Some(secs) = policy.max_age_sec {
            cc = cc.directive(CacheDirective::MaxAge(secs));
        }
        if let Some(secs) = policy.s_max_age_sec {
            cc = cc.directive(CacheDirective::SMaxAge(secs));
        }
        if let Some(secs) = policy.stale_while_revalidate_sec {
            cc = cc.directive(CacheDirective::StaleWhileRevalidate(secs));
        }
        Some(cc)
    }

    pub fn directive(mut self, directive: CacheDirective) -> Self {
        self.directives.push(directive);
        self
    }

    pub fn to_header_value(&self) -> String {
        self.directives
            .iter()
            .map(|d| d.to_header_value())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn is_private(&self) -> bool {
        self.directives.contains(&CacheDirective::Private)
    }

    pub fn is_no_store(&self) -> bool {
        self.directives.contains(&CacheDirective::NoStore)
    }

    pub fn is_no_cache(&self) -> bool {
        self.directives.contains(&CacheDirective::NoCache)
    }
}

impl fmt::Display for CacheControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_header_value())
    }
}

/// Quoted fingerprint of a body: the first 16 bytes of its SHA-256, hex.
pub fn etag_for(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    format!("\"{}\"", hex::encode(&digest[..16]))
}

/// The `Vary` value for a preset; `authorization` is never listed.
pub fn vary_value(config: &CacheConfig) -> Option<String> {
    let names: Vec<&str> = config
        .vary_by_headers
        .iter()
        .map(String::as_str)
        .filter(|name| !name.eq_ignore_ascii_case("authorization"))
        .collect();
    (!names.is_empty()).then(|| names.join(", "))
}

/// Attach `Cache-Control`, `ETag` and `Vary` according to the preset and
/// the response status.
pub fn apply_cache_headers(response: &mut HttpResponse, config: &CacheConfig, etag: Option<&str>) {
    if let Some(cc) = CacheControl::for_status(config.cdn.as_ref(), response.status) {
        response.set_header("Cache-Control", cc.to_header_value());
    }

    if response.is_success() {
        let etag = etag
            .map(str::to_string)
            .unwrap_or_else(|| etag_for(&response.body));
        response.set_header("ETag", etag);
    }

    if let Some(vary) = vary_value(config) {
        response.set_header("Vary", vary);
    }
}

/// Attach `X-Cache` and, for entries served from the store, `X-Cache-Age`.
pub fn apply_status(response: &mut HttpResponse, status: CacheStatus, age_secs: Option<u64>) {
    response.set_header(X_CACHE, status.as_str());
    if let Some(age) = age_secs {
        response.set_header(X_CACHE_AGE, age.to_string());
    }
}

/// Whether the client asked to skip the cache.
pub fn wants_bypass(req: &HttpRequest) -> bool {
    req.header_contains_token("cache-control", "no-cache") || req.header_is(X_BYPASS_CACHE, "true")
}

/// Whether the request is an internal revalidation.
pub fn is_revalidation(req: &HttpRequest) -> bool {
    req.header_is(X_CACHE_REVALIDATE, "true")
}

/// Whether an `If-None-Match` request header matches `etag`.
pub fn if_none_match(req: &HttpRequest, etag: &str) -> bool {
    let Some(value) = req.header("if-none-match") else {
        return false;
    };
    value.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate == etag || candidate.strip_prefix("W/") == Some(etag)
    })
}

/// Whether an origin response may be written to the store.
pub fn is_storable(response: &HttpResponse, max_body_bytes: usize) -> bool {
    if !response.is_success() || response.body.len() > max_body_bytes {
        return false;
    }
    if response.header("set-cookie").is_some() {
        return false;
    }
    match response.header("cache-control") {
        Some(value) => {
            let cc = CacheControl::parse(value);
            !cc.is_no_store() && !cc.is_private()
        }
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_directives() {
        let cc = CacheControl::parse("Private, max-age=60, stale-while-revalidate=30, foo");
        assert!(cc.is_private());
        assert!(cc.directives.contains(&CacheDirective::MaxAge(60)));
        assert!(cc.directives.contains(&CacheDirective::StaleWhileRevalidate(30)));
        assert!(cc.directives.contains(&CacheDirective::Extension("foo".into(), None)));
    }

    #[test]
    fn test_policy_composition() {
        let policy = CdnPolicy::public(60)
            .with_s_maxage(300)
            .with_stale_while_revalidate(120);
        let cc = CacheControl::for_status(Some(&policy), 200).unwrap();
        assert_eq!(
            cc.to_header_value(),
            "public, max-age=60, s-maxage=300, stale-while-revalidate=120"
        );
    }

    #[test]
    fn test_errors_are_no_store() {
        let policy = CdnPolicy::public(60);
        for status in [400, 404, 500, 503] {
            assert_eq!(
                CacheControl::for_status(Some(&policy), status)
                    .unwrap()
                    .to_header_value(),
                "no-store"
            );
            assert!(CacheControl::for_status(None, status).unwrap().is_no_store());
        }
        assert!(CacheControl::for_status(None, 200).is_none());
    }

    #[test]
    fn test_no_store_policy() {
        let cc = CacheControl::for_status(Some(&CdnPolicy::no_store()), 200).unwrap();
        assert_eq!(cc.to_header_value(), "no-store");
    }

    #[test]
    fn test_etag_is_fixed_length_and_body_derived() {
        let a = etag_for(b"hello");
        assert_eq!(a.len(), 34);
        assert_eq!(a, etag_for(b"hello"));
        assert_ne!(a, etag_for(b"hello!"));
    }

    #[test]
    fn test_vary_excludes_authorization() {
        let config = CacheConfig::default().with_vary_by_headers(["accept-language", "Authorization"]);
        assert_eq!(vary_value(&config), Some("accept-language".to_string()));

        let only_auth = CacheConfig::default().with_vary_by_headers(["authorization"]);
        assert_eq!(vary_value(&only_auth), None);
    }

    #[test]
    fn test_apply_cache_headers_skips_etag_on_error() {
        let config = CacheConfig::new(Duration::from_secs(60)).with_cdn(CdnPolicy::public(60));
        let mut response = HttpResponse::not_found().with_body("missing");
        apply_cache_headers(&mut response, &config, None);
        assert_eq!(response.header("Cache-Control"), Some("no-store"));
        assert!(response.header("ETag").is_none());
        assert_eq!(response.header("Vary"), Some("accept-language"));
    }

    #[test]
    fn test_if_none_match() {
        let etag = etag_for(b"body");
        let req = HttpRequest::get("/").with_header("If-None-Match", format!("\"x\", {}", etag));
        assert!(if_none_match(&req, &etag));
        assert!(if_none_match(&HttpRequest::get("/").with_header("if-none-match", "*"), &etag));
        assert!(!if_none_match(&HttpRequest::get("/"), &etag));
    }

    #[test]
    fn test_storability() {
        assert!(is_storable(&HttpResponse::ok().with_body("x"), 10));
        assert!(!is_storable(&HttpResponse::ok().with_body("too long body"), 4));
        assert!(!is_storable(&HttpResponse::internal_server_error(), 10));
        assert!(!is_storable(&HttpResponse::ok().with_header("Set-Cookie", "a=b"), 10));
        assert!(!is_storable(&HttpResponse::ok().with_header("Cache-Control", "private"), 10));
        assert!(!is_storable(&HttpResponse::ok().with_header("Cache-Control", "no-store"), 10));
    }

    #[test]
    fn test_bypass_detection() {
        assert!(wants_bypass(&HttpRequest::get("/").with_header("Cache-Control", "no-cache")));
        assert!(wants_bypass(&HttpRequest::get("/").with_header("x-bypass-cache", "true")));
        assert!(!wants_bypass(&HttpRequest::get("/").with_header("Cache-Control", "max-age=0")));
        assert!(is_revalidation(&HttpRequest::get("/").with_header("X-Cache-Revalidate", "true")));
    }
}
