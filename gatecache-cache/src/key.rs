//! Cache key construction.

use gatecache_core::HttpRequest;
use sha2::{Digest, Sha256};
use std::fmt;

/// Vary headers whose raw values never appear in a key.
const CREDENTIAL_HEADERS: &[&str] = &["authorization", "cookie", "x-api-key"];

/// Deterministic identity of a cacheable request.
///
/// Rendered as `{prefix}:{METHOD}:{path}[?query]` followed by
/// `|name=value&...` for the vary headers present on the request.
/// The path is escaped so it cannot contain `?` or `|`, and vary names and
/// values are form-encoded, so every distinct request maps to a distinct
/// key. Credential values are replaced by a SHA-256 fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub prefix: String,
    pub method: String,
    pub path: String,
    /// Query string with parameters sorted by name
    pub query: String,
    /// Lower-cased vary header names with their values, sorted by name
    pub vary_values: Vec<(String, String)>,
}

impl CacheKey {
    /// Build the key for `request` under `prefix`, splitting on
    /// `vary_headers`.
    pub fn from_request(prefix: &str, request: &HttpRequest, vary_headers: &[String]) -> Self {
        let mut vary_values: Vec<(String, String)> = vary_headers
            .iter()
            .filter_map(|header| {
                let name = header.to_ascii_lowercase();
                request.header(header).map(|value| {
                    let value = value.trim();
                    let value = if CREDENTIAL_HEADERS.contains(&name.as_str()) {
                        hex::encode(Sha256::digest(value.as_bytes()))
                    } else {
                        value.to_string()
                    };
                    (name, value)
                })
            })
            .collect();
        vary_values.sort();
        vary_values.dedup_by(|a, b| a.0 == b.0);

        Self {
            prefix: prefix.to_string(),
            method: request.method.to_ascii_uppercase(),
            path: normalize_path(&request.path),
            query: request.sorted_query(),
            vary_values,
        }
    }

    /// Convert to a string representation suitable for use as a cache key.
    pub fn to_string_key(&self) -> String {
        let mut key = format!("{}:{}:{}", self.prefix, self.method, escape_path(&self.path));
        if !self.query.is_empty() {
            key.push('?');
            key.push_str(&self.query);
        }
        if !self.vary_values.is_empty() {
            key.push('|');
            key.push_str(&serde_urlencoded::to_string(&self.vary_values).unwrap_or_default());
        }
        key
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}

/// Percent-encode the characters that delimit the query and vary sections.
fn escape_path(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '?' => escaped.push_str("%3F"),
            '|' => escaped.push_str("%7C"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Collapse duplicate slashes and drop the trailing one; the root stays `/`.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}
