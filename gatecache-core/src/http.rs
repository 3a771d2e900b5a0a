// HTTP request and response descriptors exchanged with the gateway

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// HTTP request descriptor as seen by the gateway.
///
/// Header names keep whatever casing the proxy handed us; lookups through
/// [`HttpRequest::header`] are case-insensitive.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Decoded query pairs in the order the client sent them. Repeated
    /// names are kept.
    pub query_params: Vec<(String, String)>,
}

impl HttpRequest {
    /// Create a request from a method and a request target.
    ///
    /// A query string in `target` is split off into `query_params`.
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        let target = target.into();
        let (path, query_params) = match target.split_once('?') {
            Some((path, query)) => (path.to_string(), parse_query(query)),
            None => (target, Vec::new()),
        };

        Self {
            method: method.into(),
            path,
            headers: HashMap::new(),
            body: Vec::new(),
            query_params,
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new("GET", target)
    }

    pub fn head(target: impl Into<String>) -> Self {
        Self::new("HEAD", target)
    }

    pub fn post(target: impl Into<String>) -> Self {
        Self::new("POST", target)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Append a query pair.
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Check whether a header carries `expected` (case-insensitive, trimmed).
    pub fn header_is(&self, name: &str, expected: &str) -> bool {
        self.header(name)
            .is_some_and(|value| value.trim().eq_ignore_ascii_case(expected))
    }

    /// Check whether a comma-separated header contains `token`.
    pub fn header_contains_token(&self, name: &str, token: &str) -> bool {
        self.header(name).is_some_and(|value| {
            value
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token))
        })
    }

    /// Remove every header whose name matches `name` case-insensitively.
    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|key, _| !key.eq_ignore_ascii_case(name));
    }

    /// Query string in the order the client sent it.
    pub fn query_string(&self) -> String {
        serde_urlencoded::to_string(&self.query_params).unwrap_or_default()
    }

    /// Query string with parameters sorted by name.
    ///
    /// The sort is stable, so repeated names keep their relative order.
    pub fn sorted_query(&self) -> String {
        let mut pairs: Vec<(&str, &str)> = self
            .query_params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        serde_urlencoded::to_string(&pairs).unwrap_or_default()
    }

    /// Path plus the query string as sent, as the request target.
    pub fn target(&self) -> String {
        let query = self.query_string();
        if query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, query)
        }
    }

    /// Parse the request body as JSON
    pub fn json<T: for<'de> Deserialize<'de>>(&self) -> Result<T, crate::Error> {
        serde_json::from_slice(&self.body).map_err(|e| crate::Error::Deserialization(e.to_string()))
    }

    /// First value of a query parameter
    pub fn query<'a>(&'a self, name: &str) -> Option<&'a str> {
        self.query_all(name).next()
    }

    /// Every value of a query parameter, in request order.
    pub fn query_all<'a, 'b>(&'a self, name: &'b str) -> impl Iterator<Item = &'a str> + use<'a, 'b> {
        self.query_params
            .iter()
            .filter(move |(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    serde_urlencoded::from_str(query).unwrap_or_default()
}

/// HTTP response descriptor
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn from_parts(status: u16, headers: HashMap<String, String>, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn not_modified() -> Self {
        Self::new(304)
    }

    pub fn bad_request() -> Self {
        Self::new(400)
    }

    pub fn not_found() -> Self {
        Self::new(404)
    }

    pub fn method_not_allowed() -> Self {
        Self::new(405)
    }

    pub fn internal_server_error() -> Self {
        Self::new(500)
    }

    pub fn bad_gateway() -> Self {
        Self::new(502)
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self, crate::Error> {
        self.body =
            serde_json::to_vec(value).map_err(|e| crate::Error::Serialization(e.to_string()))?;
        self.set_header("Content-Type", "application/json");
        Ok(self)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Set a header, replacing any existing header of the same name
    /// regardless of casing.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove_header(&name);
        self.headers.insert(name, value.into());
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|key, _| !key.eq_ignore_ascii_case(name));
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }
}
