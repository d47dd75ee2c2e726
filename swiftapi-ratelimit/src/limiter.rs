//! Fixed window limiter
//!
//! Each key gets a window that opens with its first request and lasts
//! `config.window`. Up to `max_requests` requests are allowed inside the
//! window; the next request after it closes starts a fresh one.
//!
//! Every check runs under a single mutex: expired windows are dropped, the
//! key's record is looked up or created, compared against the limit and
//! incremented, all without releasing the lock. Concurrent requests from the
//! same key therefore never exceed the limit.
//!
//! ```rust
//! use swiftapi_ratelimit::{RateLimitConfig, RateLimiter};
//!
//! let limiter = RateLimiter::new(RateLimitConfig::per_minute(5)).unwrap();
//!
//! for _ in 0..5 {
//!     assert!(limiter.check("10.0.0.1").allowed);
//! }
//! assert!(!limiter.check("10.0.0.1").allowed);
//! assert!(limiter.check("10.0.0.2").allowed);
//! ```

use crate::config::RateLimitConfig;
use crate::error::{RateLimitError, RateLimitHeaders, RateLimitResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy)]
struct Record {
    count: u64,
    reset_at: Instant,
}

/// Outcome of one check
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Unix timestamp at which the key's window closes
    pub reset_at: u64,
    /// Time until the window closes
    pub retry_after: Duration,
}

impl Decision {
    pub fn headers(&self) -> RateLimitHeaders {
        if self.allowed {
            RateLimitHeaders::allowed(self.limit, self.remaining, self.reset_at)
        } else {
            // Round up so clients never retry before the window closes
            let secs = self.retry_after.as_secs() + u64::from(self.retry_after.subsec_nanos() > 0);
            RateLimitHeaders::denied(self.limit, self.reset_at, secs.max(1))
        }
    }

    pub fn into_result(self) -> RateLimitResult<Self> {
        if self.allowed {
            Ok(self)
        } else {
            Err(RateLimitError::LimitExceeded {
                limit: self.limit,
                reset_at: self.reset_at,
                retry_after: self.retry_after,
            })
        }
    }
}

/// Fixed-window request counter keyed by client
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    records: Mutex<HashMap<String, Record>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> RateLimitResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            records: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count a request from `key`
    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, Instant::now())
    }

    /// Count a request from `key` as if it arrived at `now`
    pub fn check_at(&self, key: &str, now: Instant) -> Decision {
        let limit = self.config.max_requests;
        let mut records = self.records.lock();

        records.retain(|_, record| now < record.reset_at);

        let record = records.entry(key.to_string()).or_insert_with(|| Record {
            count: 0,
            reset_at: now + self.config.window,
        });
        let retry_after = record.reset_at.saturating_duration_since(now);
        let reset_at = unix_after(retry_after);

        if record.count >= limit {
            return Decision {
                allowed: false,
                limit,
                remaining: 0,
                reset_at,
                retry_after,
            };
        }

        record.count += 1;
        Decision {
            allowed: true,
            limit,
            remaining: limit - record.count,
            reset_at,
            retry_after,
        }
    }

    /// Number of keys with an open window
    pub fn tracked_keys(&self) -> usize {
        self.records.lock().len()
    }

    /// Forget the window of `key`
    pub fn reset(&self, key: &str) {
        self.records.lock().remove(key);
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

fn unix_after(delay: Duration) -> u64 {
    (SystemTime::now() + delay)
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
