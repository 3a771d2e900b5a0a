//! Integration tests for common gateway workflows.
//!
//! A gateway is wired the way a deployment would be: settings, a registry,
//! the admin router in front and one caching middleware per route family.

use gatecache::prelude::*;
use gatecache::{CacheStats, HandlerFn};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn origin(calls: Arc<AtomicUsize>) -> HandlerFn {
    handler(move |req: HttpRequest| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            if req.path.starts_with("/broken") {
                return Err(Error::Upstream("origin unavailable".into()));
            }
            HttpResponse::ok().with_json(&serde_json::json!({
                "path": req.path,
                "lang": req.header("accept-language"),
            }))
        }
    })
}

/// Routes `/catalog` through the catalog preset and `/library` through the
/// library preset, with admin endpoints in front of both.
struct Gateway {
    registry: CacheRegistry,
    catalog: MiddlewareChain,
    library: MiddlewareChain,
    calls: Arc<AtomicUsize>,
}

impl Gateway {
    fn new(settings: &GatewayCacheSettings) -> Self {
        let registry = CacheRegistry::from_settings(settings).unwrap();
        let catalog = MiddlewareChain::new()
            .with(registry.admin())
            .with(registry.middleware("catalog").unwrap());
        let library = MiddlewareChain::new()
            .with(registry.admin())
            .with(registry.middleware("library").unwrap());
        Self {
            registry,
            catalog,
            library,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    async fn send(&self, req: HttpRequest) -> Result<HttpResponse, Error> {
        let chain = if req.path.starts_with("/library") {
            &self.library
        } else {
            &self.catalog
        };
        chain.apply(req, origin(self.calls.clone())).await
    }

    fn origin_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Every default preset, local tier only.
fn local_settings() -> GatewayCacheSettings {
    GatewayCacheSettings::default()
}

#[tokio::test]
async fn test_catalog_is_cached_per_language() {
    let gateway = Gateway::new(&local_settings());

    for lang in ["en", "fr", "en"] {
        let req = HttpRequest::get("/catalog/42").with_header("Accept-Language", lang);
        let response = gateway.send(req).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["lang"], lang);
    }
    assert_eq!(gateway.origin_calls(), 2);
}

#[tokio::test]
async fn test_library_is_private_per_user() {
    let gateway = Gateway::new(&local_settings());

    let alice = || HttpRequest::get("/library").with_header("Authorization", "Bearer alice");
    let bob = HttpRequest::get("/library").with_header("Authorization", "Bearer bob");

    gateway.send(alice()).await.unwrap();
    let bob_response = gateway.send(bob).await.unwrap();
    assert_eq!(bob_response.header("X-Cache"), Some("MISS"));

    let alice_again = gateway.send(alice()).await.unwrap();
    assert_eq!(alice_again.header("X-Cache"), Some("HIT"));
    assert_eq!(alice_again.header("Cache-Control"), Some("no-store"));
    assert_eq!(alice_again.header("Vary"), Some("accept-language"));
    assert_eq!(gateway.origin_calls(), 2);
}

#[tokio::test]
async fn test_origin_failures_reach_the_client() {
    let gateway = Gateway::new(&local_settings());

    let err = gateway
        .send(HttpRequest::get("/broken/1"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 502);

    let err = gateway
        .send(HttpRequest::get("/broken/1"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Upstream(_)));
    assert_eq!(gateway.origin_calls(), 2);
}

#[tokio::test]
async fn test_admin_round_trip() {
    let gateway = Gateway::new(&local_settings());

    gateway.send(HttpRequest::get("/catalog/1")).await.unwrap();
    gateway.send(HttpRequest::get("/catalog/1")).await.unwrap();
    gateway
        .send(HttpRequest::get("/library").with_header("Authorization", "Bearer a"))
        .await
        .unwrap();

    let response = gateway
        .send(HttpRequest::get("/__cache/stats"))
        .await
        .unwrap();
    let stats: CacheStats = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.local_entry_count, 2);

    let response = gateway
        .send(HttpRequest::post("/__cache/clear"))
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    for name in gateway.registry.names() {
        let stats = gateway.registry.get(name).unwrap().stats().await;
        assert_eq!(stats, CacheStats::default(), "preset {}", name);
    }

    let response = gateway
        .send(HttpRequest::post("/__cache/invalidate").with_body("{}"))
        .await
        .unwrap();
    assert_eq!(response.status, 400);
}

#[tokio::test]
async fn test_settings_from_toml() {
    let settings = GatewayCacheSettings::from_toml_str(
        r#"
        adminPath = "/ops/cache"

        [presets.catalog]
        ttlMs = 1000
        keyPrefix = "catalog"
        maxSize = 10

        [presets.catalog.cdn]
        scope = "public"
        maxAgeSec = 1
        "#,
    )
    .unwrap();

    let gateway = Gateway::new(&GatewayCacheSettings {
        presets: {
            let mut presets = settings.presets.clone();
            presets.insert("library".into(), CacheConfig::library());
            presets
        },
        ..settings
    });

    let response = gateway.send(HttpRequest::get("/catalog/3")).await.unwrap();
    assert_eq!(response.header("Cache-Control"), Some("public, max-age=1"));
    let stats = gateway
        .send(HttpRequest::get("/ops/cache/stats"))
        .await
        .unwrap();
    assert_eq!(stats.status, 200);
}

#[cfg(feature = "redis")]
#[tokio::test]
async fn test_gateway_starts_with_redis_down() {
    let mut settings = GatewayCacheSettings::default();
    settings.redis = Some(
        RedisConfig::builder()
            .url("redis://127.0.0.1:1")
            .connection_timeout(std::time::Duration::from_millis(100))
            .command_timeout(std::time::Duration::from_millis(200))
            .build(),
    );
    let gateway = Gateway::new(&settings);

    let first = gateway.send(HttpRequest::get("/catalog/8")).await.unwrap();
    let second = gateway.send(HttpRequest::get("/catalog/8")).await.unwrap();
    assert_eq!(first.header("X-Cache"), Some("MISS"));
    assert_eq!(second.header("X-Cache"), Some("HIT"));
    assert_eq!(gateway.origin_calls(), 1);

    let catalog = gateway.registry.get("catalog").unwrap();
    assert!(catalog.stats().await.distributed_errors > 0);
}
