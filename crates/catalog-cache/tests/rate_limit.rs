//! Sliding-window limiter and its HTTP middleware.

use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    middleware,
    routing::get,
};
use catalog_cache::config::RedisConfig;
use catalog_cache::rate_limit::rate_limit_middleware;
use catalog_cache::{CacheClient, RateLimitState, RateLimiter, build_redis_store};
use time::OffsetDateTime;
use tower::ServiceExt;

const WINDOW: Duration = Duration::from_secs(60);

fn at(secs: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(secs).unwrap()
}

#[tokio::test]
async fn test_three_per_minute_window() {
    let limiter = RateLimiter::new(CacheClient::new_local(), WINDOW, 3);

    let remaining: Vec<u64> = {
        let mut out = Vec::new();
        for t in [0, 10, 20] {
            let decision = limiter.check_at("ip:198.51.100.4", WINDOW, 3, at(t)).await;
            assert!(decision.allowed, "request at t={t} should be admitted");
            out.push(decision.remaining);
        }
        out
    };
    assert_eq!(remaining, vec![2, 1, 0]);

    let rejected = limiter.check_at("ip:198.51.100.4", WINDOW, 3, at(25)).await;
    assert!(!rejected.allowed);
    assert_eq!(rejected.remaining, 0);
    assert_eq!(rejected.reset_at.unix_timestamp(), 60);
    assert_eq!(rejected.retry_after_secs(at(25)), 35);

    // The t=0 request has left the window.
    let later = limiter.check_at("ip:198.51.100.4", WINDOW, 3, at(61)).await;
    assert!(later.allowed);
}

#[tokio::test]
async fn test_rejections_are_not_recorded() {
    let limiter = RateLimiter::new(CacheClient::new_local(), WINDOW, 1);

    assert!(limiter.check_at("user:u7", WINDOW, 1, at(0)).await.allowed);
    // Hammering while limited must not extend the block.
    for t in 1..30 {
        assert!(!limiter.check_at("user:u7", WINDOW, 1, at(t)).await.allowed);
    }
    assert!(limiter.check_at("user:u7", WINDOW, 1, at(61)).await.allowed);
}

#[tokio::test]
async fn test_unreachable_store_fails_open() {
    let config = RedisConfig {
        enabled: true,
        url: "redis://127.0.0.1:1".to_string(),
        pool_size: 1,
        timeout_ms: 200,
        command_timeout_ms: 200,
    };
    let client = CacheClient::new_redis(build_redis_store(&config).unwrap());
    let limiter = RateLimiter::new(client, WINDOW, 1);

    for _ in 0..3 {
        let decision = limiter.check("ip:203.0.113.9", WINDOW, 1).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
    }
}

fn app(limit: u64) -> Router {
    let limiter = RateLimiter::new(CacheClient::new_local(), WINDOW, limit);
    let state = RateLimitState::new(limiter, WINDOW, limit);
    Router::new()
        .route("/products", get(|| async { "ok" }))
        .layer(middleware::from_fn_with_state(state, rate_limit_middleware))
}

fn from(ip: &str) -> Request<Body> {
    Request::builder()
        .uri("/products")
        .header("x-forwarded-for", ip)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_middleware_sets_headers_and_rejects() {
    let app = app(2);

    let first = app.clone().oneshot(from("192.0.2.10")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()["x-ratelimit-limit"], "2");
    assert_eq!(first.headers()["x-ratelimit-remaining"], "1");
    assert!(first.headers().contains_key("x-ratelimit-reset"));

    let second = app.clone().oneshot(from("192.0.2.10")).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers()["x-ratelimit-remaining"], "0");

    let third = app.clone().oneshot(from("192.0.2.10")).await.unwrap();
    assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = third.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
    assert_eq!(third.headers()["x-ratelimit-remaining"], "0");

    let body = axum::body::to_bytes(third.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "rate_limit_exceeded");

    // Another client has its own window.
    let other = app.oneshot(from("192.0.2.11")).await.unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}
