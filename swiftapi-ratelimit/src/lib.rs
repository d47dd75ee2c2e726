//! Fixed-window rate limiting for SwiftAPI
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use swiftapi_ratelimit::{RateLimitConfig, RateLimitMiddleware, RateLimiter};
//!
//! let limiter = Arc::new(RateLimiter::new(RateLimitConfig::per_minute(100))?);
//! app.use_middleware(Arc::new(RateLimitMiddleware::new(limiter)));
//! ```
//!
//! Allowed responses carry `X-RateLimit-Limit`, `X-RateLimit-Remaining` and
//! `X-RateLimit-Reset`; rejected ones are 429 with `Retry-After` as well.

pub mod config;
pub mod error;
pub mod extractor;
pub mod limiter;
pub mod middleware;

pub use config::RateLimitConfig;
pub use error::{RateLimitError, RateLimitHeaders, RateLimitResult};
pub use extractor::{KeyExtractor, KeyExtractorFn};
pub use limiter::{Decision, RateLimiter};
pub use middleware::RateLimitMiddleware;
