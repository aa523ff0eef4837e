//! Axum adapter for the sliding-window limiter.
//!
//! ```ignore
//! let state = RateLimitState::new(limiter, Duration::from_secs(60), 100);
//! let app = Router::new()
//!     .route("/products", get(list_products))
//!     .layer(middleware::from_fn_with_state(state, rate_limit_middleware));
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::Json;
use axum::response::{IntoResponse, Response};
use time::OffsetDateTime;

use super::{RateLimitDecision, RateLimitSubject, RateLimiter};

/// Shared state for [`rate_limit_middleware`].
#[derive(Debug, Clone)]
pub struct RateLimitState {
    limiter: RateLimiter,
    window: Duration,
    limit: u64,
    per_endpoint: bool,
}

impl RateLimitState {
    pub fn new(limiter: RateLimiter, window: Duration, limit: u64) -> Self {
        Self {
            limiter,
            window,
            limit,
            per_endpoint: false,
        }
    }

    /// Keep a separate window per client and request path.
    pub fn per_endpoint(mut self, per_endpoint: bool) -> Self {
        self.per_endpoint = per_endpoint;
        self
    }

    fn subject(&self, request: &Request) -> RateLimitSubject {
        let ip = client_ip(request);
        if self.per_endpoint {
            RateLimitSubject::IpEndpoint {
                ip,
                endpoint: request.uri().path().to_string(),
            }
        } else {
            RateLimitSubject::Ip(ip)
        }
    }
}

/// Client address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the
/// peer address if the server was started with connect info.
fn client_ip(request: &Request) -> String {
    let headers = request.headers();
    if let Some(forwarded) = headers.get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first) = value.split(',').next()
        && !first.trim().is_empty()
    {
        return first.trim().to_string();
    }

    if let Some(real_ip) = headers.get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
    {
        return value.trim().to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(
        HeaderName::from_static("x-ratelimit-limit"),
        HeaderValue::from(decision.limit),
    );
    headers.insert(
        HeaderName::from_static("x-ratelimit-remaining"),
        HeaderValue::from(decision.remaining),
    );
    headers.insert(
        HeaderName::from_static("x-ratelimit-reset"),
        HeaderValue::from(decision.reset_at.unix_timestamp()),
    );
}

fn too_many_requests(decision: &RateLimitDecision) -> Response {
    let retry_after = decision.retry_after_secs(OffsetDateTime::now_utc());
    let body = serde_json::json!({
        "error": "rate_limit_exceeded",
        "message": "Too many requests, retry later",
        "retry_after": retry_after,
    });

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    apply_headers(headers, decision);
    headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

/// Admit or reject the request by client IP.
///
/// Admitted responses carry `X-RateLimit-Limit`, `X-RateLimit-Remaining` and
/// `X-RateLimit-Reset` (unix seconds). Rejections are `429` with `Retry-After`.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let subject = state.subject(&request);
    let decision = state
        .limiter
        .check(&subject.to_string(), state.window, state.limit)
        .await;

    if !decision.allowed {
        return too_many_requests(&decision);
    }

    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &decision);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(headers: &[(&str, &str)]) -> Request {
        let mut builder = axum::http::Request::builder().uri("/products/p1");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let req = request(&[("x-forwarded-for", "203.0.113.7, 10.0.0.1"), ("x-real-ip", "10.0.0.2")]);
        assert_eq!(client_ip(&req), "203.0.113.7");
    }

    #[test]
    fn test_client_ip_falls_back() {
        assert_eq!(client_ip(&request(&[("x-real-ip", "10.0.0.2")])), "10.0.0.2");
        assert_eq!(client_ip(&request(&[])), "unknown");

        let mut req = request(&[]);
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000))));
        assert_eq!(client_ip(&req), "192.0.2.1");
    }

    #[test]
    fn test_per_endpoint_subject_includes_path() {
        let limiter = RateLimiter::new(
            crate::client::CacheClient::new_local(),
            Duration::from_secs(60),
            10,
        );
        let state = RateLimitState::new(limiter, Duration::from_secs(60), 10).per_endpoint(true);
        let subject = state.subject(&request(&[("x-forwarded-for", "1.2.3.4")]));
        assert_eq!(subject.to_string(), "ip:1.2.3.4:/products/p1");
    }
}
