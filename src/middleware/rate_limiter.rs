// Global request rate limiting with governor

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tracing::{info, warn};

use crate::config::RateLimitConfig;

pub type GlobalRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// `requests` per `period_secs`, all available as an initial burst.
/// `None` when limiting is disabled or the quota is degenerate.
pub fn build_rate_limiter(config: &RateLimitConfig) -> Option<Arc<GlobalRateLimiter>> {
    if !config.enabled {
        return None;
    }

    let Some(burst) = NonZeroU32::new(config.requests) else {
        warn!("RATE_LIMIT_TIMES is 0, rate limiting disabled");
        return None;
    };

    let replenish = Duration::from_secs(config.period_secs.max(1)) / burst.get();
    let Some(quota) = Quota::with_period(replenish) else {
        warn!("Rate limit period too small, rate limiting disabled");
        return None;
    };

    info!(
        requests = config.requests,
        period_secs = config.period_secs,
        "Rate limiting enabled"
    );
    Some(Arc::new(RateLimiter::direct(quota.allow_burst(burst))))
}

pub async fn rate_limiter_middleware(
    State(limiter): State<Arc<GlobalRateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    match limiter.check() {
        Ok(()) => next.run(req).await,
        Err(not_until) => {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            let retry_after = wait.as_secs().max(1);

            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({
                    "error": "rate_limited",
                    "detail": format!("Too many requests, retry in {} seconds", retry_after),
                })),
            )
                .into_response();

            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, middleware, routing::get, Router};
    use tower::ServiceExt;

    fn config(enabled: bool, requests: u32) -> RateLimitConfig {
        RateLimitConfig {
            enabled,
            requests,
            period_secs: 60,
        }
    }

    #[test]
    fn test_disabled_or_zero_quota_builds_nothing() {
        assert!(build_rate_limiter(&config(false, 10)).is_none());
        assert!(build_rate_limiter(&config(true, 0)).is_none());
        assert!(build_rate_limiter(&config(true, 10)).is_some());
    }

    #[tokio::test]
    async fn test_requests_over_burst_get_429() {
        let limiter = build_rate_limiter(&config(true, 2)).unwrap();
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(limiter, rate_limiter_middleware));

        let mut statuses = Vec::new();
        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
                .await
                .unwrap();
            statuses.push(response.status());
        }

        assert_eq!(
            statuses,
            vec![StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
        );
    }
}
