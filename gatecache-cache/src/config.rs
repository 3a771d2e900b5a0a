//! Cache policy configuration.

use crate::breaker::BreakerConfig;
use crate::error::{CacheError, CacheResult};
use gatecache_core::HttpRequest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Default lifetime of a revalidation lease.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(35);

/// Default upper bound for one background refresh.
pub const DEFAULT_REVALIDATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default largest response body that will be stored.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Default base path of the administrative endpoints.
pub const DEFAULT_ADMIN_PATH: &str = "/__cache";

/// Predicate deciding that a request must bypass the cache.
pub type ExcludePredicate = Arc<dyn Fn(&HttpRequest) -> bool + Send + Sync>;

/// Who may store a response downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheScope {
    Public,
    Private,
}

/// Downstream (CDN / browser) caching policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdnPolicy {
    pub scope: CacheScope,
    #[serde(default)]
    pub max_age_sec: Option<u64>,
    #[serde(default)]
    pub s_max_age_sec: Option<u64>,
    #[serde(default)]
    pub stale_while_revalidate_sec: Option<u64>,
    #[serde(default)]
    pub no_store: bool,
}

impl CdnPolicy {
    /// A public policy with the given browser max-age.
    pub fn public(max_age_sec: u64) -> Self {
        Self {
            scope: CacheScope::Public,
            max_age_sec: Some(max_age_sec),
            s_max_age_sec: None,
            stale_while_revalidate_sec: None,
            no_store: false,
        }
    }

    /// A private policy with the given browser max-age.
    pub fn private(max_age_sec: u64) -> Self {
        Self {
            scope: CacheScope::Private,
            ..Self::public(max_age_sec)
        }
    }

    /// A policy forbidding any downstream storage.
    pub fn no_store() -> Self {
        Self {
            scope: CacheScope::Private,
            max_age_sec: None,
            s_max_age_sec: None,
            stale_while_revalidate_sec: None,
            no_store: true,
        }
    }

    pub fn with_s_maxage(mut self, secs: u64) -> Self {
        self.s_max_age_sec = Some(secs);
        self
    }

    pub fn with_stale_while_revalidate(mut self, secs: u64) -> Self {
        self.stale_while_revalidate_sec = Some(secs);
        self
    }
}

/// Immutable policy bound to one cache instance.
///
/// File representation uses camelCase with millisecond durations, e.g.
/// `{ "ttlMs": 60000, "staleWhileRevalidateMs": 120000, "keyPrefix": "catalog" }`.
/// `exclude_when` can only be set from code.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// How long an entry is fresh.
    #[serde(rename = "ttlMs", with = "millis")]
    pub ttl: Duration,

    /// How long past `ttl` an entry may still be served while it refreshes.
    #[serde(rename = "staleWhileRevalidateMs", default, with = "opt_millis")]
    pub stale_while_revalidate: Option<Duration>,

    /// Capacity of the process-local tier.
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// Namespace for every key this instance writes.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Request headers whose values split the cache.
    #[serde(default = "default_vary_by_headers")]
    pub vary_by_headers: Vec<String>,

    #[serde(skip)]
    pub exclude_when: Option<ExcludePredicate>,

    #[serde(default)]
    pub cdn: Option<CdnPolicy>,

    /// Larger origin bodies are forwarded but never stored.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    #[serde(
        rename = "revalidationTimeoutMs",
        with = "millis",
        default = "default_revalidation_timeout"
    )]
    pub revalidation_timeout: Duration,

    #[serde(rename = "lockTtlMs", with = "millis", default = "default_lock_ttl")]
    pub lock_ttl: Duration,

    /// When to stop calling an unhealthy distributed tier.
    #[serde(default)]
    pub breaker: BreakerConfig,
}

fn default_max_size() -> usize {
    1000
}

fn default_key_prefix() -> String {
    "cache".to_string()
}

fn default_vary_by_headers() -> Vec<String> {
    vec!["accept-language".to_string()]
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

fn default_revalidation_timeout() -> Duration {
    DEFAULT_REVALIDATION_TIMEOUT
}

fn default_lock_ttl() -> Duration {
    DEFAULT_LOCK_TTL
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            stale_while_revalidate: None,
            max_size: default_max_size(),
            key_prefix: default_key_prefix(),
            vary_by_headers: default_vary_by_headers(),
            exclude_when: None,
            cdn: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            revalidation_timeout: DEFAULT_REVALIDATION_TIMEOUT,
            lock_ttl: DEFAULT_LOCK_TTL,
            breaker: BreakerConfig::default(),
        }
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("ttl", &self.ttl)
            .field("stale_while_revalidate", &self.stale_while_revalidate)
            .field("max_size", &self.max_size)
            .field("key_prefix", &self.key_prefix)
            .field("vary_by_headers", &self.vary_by_headers)
            .field("exclude_when", &self.exclude_when.as_ref().map(|_| "<predicate>"))
            .field("cdn", &self.cdn)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("revalidation_timeout", &self.revalidation_timeout)
            .field("lock_ttl", &self.lock_ttl)
            .field("breaker", &self.breaker)
            .finish()
    }
}

impl CacheConfig {
    /// Create a configuration with the given TTL and defaults elsewhere.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            ..Default::default()
        }
    }

    /// Product catalog pages: shared by everyone, refreshed in the background.
    pub fn catalog() -> Self {
        Self::new(Duration::from_secs(60))
            .with_stale_while_revalidate(Duration::from_secs(120))
            .with_key_prefix("catalog")
            .with_max_size(1000)
            .with_cdn(
                CdnPolicy::public(60)
                    .with_s_maxage(300)
                    .with_stale_while_revalidate(120),
            )
    }

    /// Per-user library views.
    ///
    /// Split by `authorization` and kept out of shared caches. Background
    /// refresh strips credentials, so there is no stale window.
    pub fn library() -> Self {
        Self::new(Duration::from_secs(30))
            .with_key_prefix("library")
            .with_max_size(500)
            .with_vary_by_headers(["accept-language", "authorization"])
            .with_cdn(CdnPolicy::no_store())
    }

    /// Discovery feeds: tolerant of staleness, short browser lifetime.
    pub fn explore() -> Self {
        Self::new(Duration::from_secs(300))
            .with_stale_while_revalidate(Duration::from_secs(600))
            .with_key_prefix("explore")
            .with_max_size(500)
            .with_cdn(
                CdnPolicy::public(120)
                    .with_s_maxage(300)
                    .with_stale_while_revalidate(600),
            )
    }

    /// Static assets served through the gateway.
    pub fn static_assets() -> Self {
        Self::new(Duration::from_secs(3600))
            .with_stale_while_revalidate(Duration::from_secs(86_400))
            .with_key_prefix("static")
            .with_max_size(2000)
            .with_vary_by_headers(Vec::<String>::new())
            .with_cdn(
                CdnPolicy::public(3600)
                    .with_s_maxage(86_400)
                    .with_stale_while_revalidate(86_400),
            )
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_stale_while_revalidate(mut self, window: Duration) -> Self {
        self.stale_while_revalidate = Some(window);
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_vary_by_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vary_by_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    /// Bypass the cache for requests matching `predicate`.
    pub fn with_exclude_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&HttpRequest) -> bool + Send + Sync + 'static,
    {
        self.exclude_when = Some(Arc::new(predicate));
        self
    }

    pub fn with_cdn(mut self, policy: CdnPolicy) -> Self {
        self.cdn = Some(policy);
        self
    }

    pub fn with_max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }

    pub fn with_revalidation_timeout(mut self, timeout: Duration) -> Self {
        self.revalidation_timeout = timeout;
        self
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// How long an entry stays retrievable from the stores.
    pub fn retention(&self) -> Duration {
        self.ttl + self.stale_while_revalidate.unwrap_or(Duration::ZERO)
    }

    /// Whether the request matches the exclusion predicate.
    pub fn excludes(&self, req: &HttpRequest) -> bool {
        self.exclude_when.as_ref().is_some_and(|predicate| predicate(req))
    }

    /// Reject policies that cannot work or that would leak private data.
    pub fn validate(&self) -> CacheResult<()> {
        if self.ttl.is_zero() {
            return Err(CacheError::Config(format!(
                "preset '{}': ttl must be greater than zero",
                self.key_prefix
            )));
        }
        if self.max_size == 0 {
            return Err(CacheError::Config(format!(
                "preset '{}': maxSize must be greater than zero",
                self.key_prefix
            )));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(CacheError::Config(format!(
                "preset '{}': breaker failureThreshold must be greater than zero",
                self.key_prefix
            )));
        }
        if self.key_prefix.is_empty() {
            return Err(CacheError::Config("keyPrefix must not be empty".to_string()));
        }
        if self.lock_ttl <= self.revalidation_timeout {
            return Err(CacheError::Config(format!(
                "preset '{}': lock ttl must outlive the revalidation timeout",
                self.key_prefix
            )));
        }
        let is_public = self
            .cdn
            .as_ref()
            .is_some_and(|cdn| cdn.scope == CacheScope::Public && !cdn.no_store);
        let varies_on_auth = self
            .vary_by_headers
            .iter()
            .any(|h| h.eq_ignore_ascii_case("authorization"));
        if is_public && varies_on_auth {
            return Err(CacheError::Config(format!(
                "preset '{}': public presets must not vary on authorization",
                self.key_prefix
            )));
        }
        Ok(())
    }
}

/// Process-wide cache settings: the shared Redis connection, the admin
/// mount point and every named preset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayCacheSettings {
    #[cfg(feature = "redis")]
    #[serde(default)]
    pub redis: Option<gatecache_redis::RedisConfig>,

    #[serde(default = "default_admin_path")]
    pub admin_path: String,

    #[serde(default)]
    pub presets: BTreeMap<String, CacheConfig>,
}

fn default_admin_path() -> String {
    DEFAULT_ADMIN_PATH.to_string()
}

impl Default for GatewayCacheSettings {
    fn default() -> Self {
        let presets = [
            ("catalog", CacheConfig::catalog()),
            ("library", CacheConfig::library()),
            ("explore", CacheConfig::explore()),
            ("static", CacheConfig::static_assets()),
        ]
        .into_iter()
        .map(|(name, config)| (name.to_string(), config))
        .collect();

        Self {
            #[cfg(feature = "redis")]
            redis: None,
            admin_path: default_admin_path(),
            presets,
        }
    }
}

impl GatewayCacheSettings {
    /// Parse settings from TOML.
    pub fn from_toml_str(content: &str) -> CacheResult<Self> {
        let settings: Self =
            toml::from_str(content).map_err(|e| CacheError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from JSON.
    pub fn from_json_str(content: &str) -> CacheResult<Self> {
        let settings: Self =
            serde_json::from_str(content).map_err(|e| CacheError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a `.toml` or `.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> CacheResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| CacheError::Config(format!("{}: {}", path.display(), e)))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            Some("json") => Self::from_json_str(&content),
            other => Err(CacheError::Config(format!(
                "unsupported settings format: {:?}",
                other
            ))),
        }
    }

    /// Validate every preset and the admin path.
    pub fn validate(&self) -> CacheResult<()> {
        if !self.admin_path.starts_with('/') {
            return Err(CacheError::Config(format!(
                "admin path must start with '/': {}",
                self.admin_path
            )));
        }
        for (name, preset) in &self.presets {
            preset
                .validate()
                .map_err(|e| CacheError::Config(format!("{}: {}", name, e)))?;
        }
        Ok(())
    }

    /// Look up a preset by name.
    pub fn preset(&self, name: &str) -> Option<&CacheConfig> {
        self.presets.get(name)
    }
}

pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        for (name, preset) in GatewayCacheSettings::default().presets {
            assert!(preset.validate().is_ok(), "preset {} invalid", name);
        }
    }

    #[test]
    fn test_public_presets_never_vary_on_authorization() {
        for preset in [
            CacheConfig::catalog(),
            CacheConfig::explore(),
            CacheConfig::static_assets(),
        ] {
            assert!(
                !preset
                    .vary_by_headers
                    .iter()
                    .any(|h| h.eq_ignore_ascii_case("authorization"))
            );
        }
    }

    #[test]
    fn test_validate_rejects_public_authorization_vary() {
        let config = CacheConfig::catalog().with_vary_by_headers(["Authorization"]);
        assert!(matches!(config.validate(), Err(CacheError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_ttl_and_size() {
        assert!(CacheConfig::new(Duration::ZERO).validate().is_err());
        assert!(CacheConfig::default().with_max_size(0).validate().is_err());
    }

    #[test]
    fn test_retention_includes_stale_window() {
        let config = CacheConfig::new(Duration::from_secs(60))
            .with_stale_while_revalidate(Duration::from_secs(120));
        assert_eq!(config.retention(), Duration::from_secs(180));
        assert_eq!(CacheConfig::new(Duration::from_secs(60)).retention(), Duration::from_secs(60));
    }

    #[test]
    fn test_exclude_when() {
        let config = CacheConfig::default().with_exclude_when(|req| req.path.starts_with("/admin"));
        assert!(config.excludes(&HttpRequest::get("/admin/users")));
        assert!(!config.excludes(&HttpRequest::get("/catalog")));
    }

    #[test]
    fn test_deserialize_camel_case() {
        let config: CacheConfig = serde_json::from_str(
            r#"{
                "ttlMs": 60000,
                "staleWhileRevalidateMs": 120000,
                "maxSize": 50,
                "keyPrefix": "catalog",
                "cdn": { "scope": "public", "maxAgeSec": 60, "sMaxAgeSec": 300 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.ttl, Duration::from_secs(60));
        assert_eq!(config.stale_while_revalidate, Some(Duration::from_secs(120)));
        assert_eq!(config.max_size, 50);
        assert_eq!(config.vary_by_headers, vec!["accept-language".to_string()]);
        assert_eq!(config.lock_ttl, DEFAULT_LOCK_TTL);
        assert_eq!(config.breaker, BreakerConfig::default());
        let cdn = config.cdn.unwrap();
        assert_eq!(cdn.scope, CacheScope::Public);
        assert_eq!(cdn.s_max_age_sec, Some(300));
        assert!(!cdn.no_store);
    }

    #[test]
    fn test_settings_from_toml() {
        let settings = GatewayCacheSettings::from_toml_str(
            r#"
            adminPath = "/internal/cache"

            [presets.catalog]
            ttlMs = 60000
            keyPrefix = "catalog"
            varyByHeaders = ["accept-language", "x-region"]

            [presets.catalog.cdn]
            scope = "public"
            maxAgeSec = 60

            [presets.catalog.breaker]
            failureThreshold = 2
            "#,
        )
        .unwrap();

        assert_eq!(settings.admin_path, "/internal/cache");
        let catalog = settings.preset("catalog").unwrap();
        assert_eq!(catalog.vary_by_headers.len(), 2);
        assert_eq!(catalog.stale_while_revalidate, None);
        assert_eq!(catalog.breaker.failure_threshold, 2);
        assert_eq!(catalog.breaker.reset_timeout, crate::breaker::DEFAULT_RESET_TIMEOUT);
    }

    #[test]
    fn test_settings_reject_invalid_preset() {
        let result = GatewayCacheSettings::from_json_str(
            r#"{ "presets": { "broken": { "ttlMs": 0 } } }"#,
        );
        assert!(matches!(result, Err(CacheError::Config(_))));
    }
}
