//! Rate limiter configuration

use crate::error::{RateLimitError, RateLimitResult};
use serde::Deserialize;
use std::time::Duration;

/// Settings for a fixed-window limiter
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed per key in one window
    pub max_requests: u64,
    pub window: Duration,
    /// Add `X-RateLimit-*` headers to allowed responses
    pub include_headers: bool,
    /// Error message of 429 responses
    pub message: String,
    /// Keys that are never limited
    pub bypass_keys: Vec<String>,
}

impl Default for RateLimitConfig {
    /// One request per second
    fn default() -> Self {
        Self {
            max_requests: 1,
            window: Duration::from_secs(1),
            include_headers: true,
            message: "Too Many Requests".to_string(),
            bypass_keys: Vec::new(),
        }
    }
}

impl RateLimitConfig {
    pub fn new(max_requests: u64, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            ..Self::default()
        }
    }

    pub fn per_second(max_requests: u64) -> Self {
        Self::new(max_requests, Duration::from_secs(1))
    }

    pub fn per_minute(max_requests: u64) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    pub fn with_headers(mut self, include: bool) -> Self {
        self.include_headers = include;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_bypass_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bypass_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn validate(&self) -> RateLimitResult<()> {
        if self.max_requests == 0 {
            return Err(RateLimitError::config("max_requests must be greater than 0"));
        }
        if self.window.is_zero() {
            return Err(RateLimitError::config("window must be non-zero"));
        }
        Ok(())
    }
}
