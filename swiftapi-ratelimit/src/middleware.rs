//! Rate limiting middleware
//!
//! Counts every request against the client's window and answers 429 with
//! `Retry-After` once the window's budget is spent.

use crate::RateLimiter;
use crate::extractor::KeyExtractor;
use async_trait::async_trait;
use std::sync::Arc;
use swiftapi_core::logging::{debug, info, trace, warn};
use swiftapi_core::{Error, HttpRequest, HttpResponse, Middleware, Next};

/// ```
/// use std::sync::Arc;
/// use swiftapi_core::{HttpRequest, HttpResponse, Middleware, next_fn};
/// use swiftapi_ratelimit::{RateLimitConfig, RateLimitMiddleware, RateLimiter};
///
/// # tokio_test::block_on(async {
/// let limiter = Arc::new(RateLimiter::new(RateLimitConfig::per_minute(1)).unwrap());
/// let middleware = RateLimitMiddleware::new(limiter);
/// let request = || HttpRequest::new("GET", "/").with_remote_addr("10.0.0.1:80".parse().unwrap());
///
/// let ok = middleware
///     .handle(request(), next_fn(|_| async { Ok(HttpResponse::ok()) }))
///     .await
///     .unwrap();
/// assert_eq!(ok.status, 200);
///
/// let limited = middleware
///     .handle(request(), next_fn(|_| async { Ok(HttpResponse::ok()) }))
///     .await
///     .unwrap();
/// assert_eq!(limited.status, 429);
/// # });
/// ```
pub struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
    key_extractor: KeyExtractor,
}

impl RateLimitMiddleware {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            key_extractor: KeyExtractor::Ip,
        }
    }

    pub fn with_extractor(mut self, extractor: KeyExtractor) -> Self {
        self.key_extractor = extractor;
        self
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    fn limited_response(&self, decision: &crate::Decision) -> Result<HttpResponse, Error> {
        let mut response = HttpResponse::new(429).with_json(&serde_json::json!({
            "error": self.limiter.config().message,
            "status": 429,
        }))?;
        decision.headers().apply(&mut response);
        Ok(response)
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
        let Some(key) = self.key_extractor.extract(&req) else {
            warn!(path = %req.path, "Could not extract rate limit key, allowing request");
            return next(req).await;
        };

        let config = self.limiter.config();
        if config.bypass_keys.contains(&key) {
            debug!(key = %key, "Key is in bypass list, allowing request");
            return next(req).await;
        }

        let decision = self.limiter.check(&key);
        if !decision.allowed {
            info!(key = %key, retry_after = ?decision.retry_after, "Rate limit exceeded");
            return self.limited_response(&decision);
        }

        trace!(key = %key, remaining = decision.remaining, "Request allowed");
        let mut response = next(req).await?;
        if config.include_headers {
            decision.headers().apply(&mut response);
        }
        Ok(response)
    }
}
