//! Rate limiting through the router

use std::net::SocketAddr;
use std::sync::Arc;
use swiftapi_core::*;
use swiftapi_ratelimit::{KeyExtractor, RateLimitConfig, RateLimitMiddleware, RateLimiter};

fn router_with(middleware: RateLimitMiddleware) -> Arc<Router> {
    let mut app = Application::with_config(AppConfig {
        request_logging: false,
        ..AppConfig::default()
    });
    app.use_middleware(Arc::new(middleware));
    app.add_router(|r| {
        r.get("/ping", &[], || async { "pong" })?;
        Ok(())
    })
    .unwrap();
    app.build().unwrap()
}

fn limited(config: RateLimitConfig) -> RateLimitMiddleware {
    RateLimitMiddleware::new(Arc::new(RateLimiter::new(config).unwrap()))
}

fn ping_from(addr: &str) -> HttpRequest {
    let addr: SocketAddr = addr.parse().unwrap();
    HttpRequest::new("GET", "/ping").with_remote_addr(addr)
}

#[tokio::test]
async fn test_second_request_in_window_is_rejected() {
    let router = router_with(limited(RateLimitConfig::default()));

    let first = router.handle(ping_from("10.1.1.1:5000")).await;
    assert_eq!(first.status, 200);
    assert_eq!(first.body_str(), "pong");
    assert_eq!(first.header("X-RateLimit-Limit"), Some("1"));
    assert_eq!(first.header("X-RateLimit-Remaining"), Some("0"));

    // Same address, different port
    let second = router.handle(ping_from("10.1.1.1:5001")).await;
    assert_eq!(second.status, 429);
    assert_eq!(second.header("Retry-After"), Some("1"));

    let body: serde_json::Value = serde_json::from_slice(&second.body).unwrap();
    assert_eq!(body["error"], "Too Many Requests");
    assert_eq!(body["status"], 429);
}

#[tokio::test]
async fn test_clients_are_limited_separately() {
    let router = router_with(limited(RateLimitConfig::per_minute(2)));

    for _ in 0..2 {
        assert_eq!(router.handle(ping_from("10.0.0.1:1")).await.status, 200);
    }
    assert_eq!(router.handle(ping_from("10.0.0.1:1")).await.status, 429);
    assert_eq!(router.handle(ping_from("10.0.0.2:1")).await.status, 200);
}

#[tokio::test]
async fn test_window_reopens_after_expiry() {
    let router = router_with(limited(RateLimitConfig::new(
        1,
        std::time::Duration::from_millis(50),
    )));

    assert_eq!(router.handle(ping_from("10.0.0.3:1")).await.status, 200);
    assert_eq!(router.handle(ping_from("10.0.0.3:1")).await.status, 429);

    tokio::time::sleep(std::time::Duration::from_millis(80)).await;
    assert_eq!(router.handle(ping_from("10.0.0.3:1")).await.status, 200);
}

#[tokio::test]
async fn test_bypass_keys_and_custom_message() {
    let config = RateLimitConfig::default()
        .with_bypass_keys(["127.0.0.1"])
        .with_message("Slow down")
        .with_headers(false);
    let router = router_with(limited(config));

    for _ in 0..3 {
        let response = router.handle(ping_from("127.0.0.1:9")).await;
        assert_eq!(response.status, 200);
        assert!(response.header("X-RateLimit-Limit").is_none());
    }

    assert_eq!(router.handle(ping_from("10.0.0.4:1")).await.status, 200);
    let rejected = router.handle(ping_from("10.0.0.4:1")).await;
    assert_eq!(rejected.status, 429);
    assert!(rejected.body_str().contains("Slow down"));
}

#[tokio::test]
async fn test_request_without_key_is_allowed() {
    let router = router_with(limited(RateLimitConfig::default()));

    for _ in 0..3 {
        let response = router.handle(HttpRequest::new("GET", "/ping")).await;
        assert_eq!(response.status, 200);
    }
}

#[tokio::test]
async fn test_api_key_extractor() {
    let middleware = limited(RateLimitConfig::default())
        .with_extractor(KeyExtractor::header("X-Api-Key"));
    let router = router_with(middleware);

    let request = |key: &str| HttpRequest::new("GET", "/ping").with_header("X-Api-Key", key);

    assert_eq!(router.handle(request("alpha")).await.status, 200);
    assert_eq!(router.handle(request("alpha")).await.status, 429);
    assert_eq!(router.handle(request("beta")).await.status, 200);
}
