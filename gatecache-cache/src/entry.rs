//! Stored response entries.

use crate::error::{CacheError, CacheResult};
use crate::headers::etag_for;
use chrono::{DateTime, Utc};
use gatecache_core::HttpResponse;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Response headers kept alongside a stored body.
pub const STORED_HEADERS: &[&str] = &[
    "content-type",
    "content-language",
    "content-encoding",
    "content-disposition",
    "last-modified",
    "link",
    "x-total-count",
];

/// A cached origin response.
///
/// Entries are immutable once written; a refresh writes a new entry under
/// the same key. The JSON form uses epoch milliseconds and a base64 body so
/// every gateway instance can read what another one wrote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    #[serde(with = "base64_body")]
    pub body: Vec<u8>,
    pub content_type: String,
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub cached_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub stale_until: Option<DateTime<Utc>>,
    pub etag: String,
}

impl CacheEntry {
    /// Capture an origin response.
    pub fn from_response(
        response: &HttpResponse,
        cached_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        stale_until: Option<DateTime<Utc>>,
    ) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                let name = name.to_ascii_lowercase();
                STORED_HEADERS
                    .contains(&name.as_str())
                    .then(|| (name, value.clone()))
            })
            .collect();

        Self {
            body: response.body.clone(),
            content_type: response
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string(),
            status: response.status,
            headers,
            cached_at,
            expires_at,
            stale_until,
            etag: etag_for(&response.body),
        }
    }

    /// Rebuild a response carrying the stored status, headers and body.
    pub fn to_response(&self) -> HttpResponse {
        let mut response = HttpResponse::new(self.status).with_body(self.body.clone());
        for (name, value) in &self.headers {
            response.set_header(name.clone(), value.clone());
        }
        response.set_header("content-type", self.content_type.clone());
        response
    }

    /// Whole seconds since the entry was written.
    pub fn age_secs(&self, now: DateTime<Utc>) -> u64 {
        (now - self.cached_at).num_seconds().max(0) as u64
    }

    /// Serialize for storage.
    pub fn encode(&self) -> CacheResult<String> {
        serde_json::to_string(self).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    /// Parse a stored value, rejecting entries whose timestamps are out of
    /// order.
    pub fn decode(raw: &str) -> CacheResult<Self> {
        let entry: Self =
            serde_json::from_str(raw).map_err(|e| CacheError::Deserialization(e.to_string()))?;
        let ordered = entry.cached_at <= entry.expires_at
            && entry.stale_until.is_none_or(|until| entry.expires_at <= until);
        if !ordered {
            return Err(CacheError::Deserialization(
                "entry timestamps out of order".to_string(),
            ));
        }
        Ok(entry)
    }
}

mod base64_body {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
