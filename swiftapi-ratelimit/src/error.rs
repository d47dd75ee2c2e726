//! Error types for rate limiting

use std::time::Duration;
use swiftapi_core::HttpResponse;
use thiserror::Error;

/// Result type for rate limiting operations
pub type RateLimitResult<T> = Result<T, RateLimitError>;

/// Rate limiting errors
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Rate limit exceeded
    #[error("Rate limit exceeded. Retry after {retry_after:?}")]
    LimitExceeded {
        limit: u64,
        /// When the limit resets (Unix timestamp)
        reset_at: u64,
        retry_after: Duration,
    },

    #[error("Rate limit configuration error: {0}")]
    ConfigError(String),
}

impl RateLimitError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn is_limit_exceeded(&self) -> bool {
        matches!(self, Self::LimitExceeded { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::LimitExceeded { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<RateLimitError> for swiftapi_core::Error {
    fn from(err: RateLimitError) -> Self {
        match &err {
            RateLimitError::LimitExceeded { .. } => {
                swiftapi_core::Error::TooManyRequests(err.to_string())
            }
            RateLimitError::ConfigError(msg) => swiftapi_core::Error::Config(msg.clone()),
        }
    }
}

/// Standard rate limit headers
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitHeaders {
    /// X-RateLimit-Limit
    pub limit: u64,
    /// X-RateLimit-Remaining
    pub remaining: u64,
    /// X-RateLimit-Reset, a Unix timestamp
    pub reset: u64,
    /// Retry-After in seconds, only when limited
    pub retry_after: Option<u64>,
}

impl RateLimitHeaders {
    pub fn allowed(limit: u64, remaining: u64, reset: u64) -> Self {
        Self {
            limit,
            remaining,
            reset,
            retry_after: None,
        }
    }

    pub fn denied(limit: u64, reset: u64, retry_after: u64) -> Self {
        Self {
            limit,
            remaining: 0,
            reset,
            retry_after: Some(retry_after),
        }
    }

    /// Header name/value pairs
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset.to_string()),
        ];
        if let Some(retry_after) = self.retry_after {
            pairs.push(("Retry-After", retry_after.to_string()));
        }
        pairs
    }

    pub fn apply(&self, response: &mut HttpResponse) {
        for (name, value) in self.to_pairs() {
            response.headers.insert(name.to_string(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denied_headers_include_retry_after() {
        let headers = RateLimitHeaders::denied(10, 1_700_000_000, 30);
        let mut response = HttpResponse::new(429);
        headers.apply(&mut response);

        assert_eq!(response.header("x-ratelimit-limit"), Some("10"));
        assert_eq!(response.header("X-RateLimit-Remaining"), Some("0"));
        assert_eq!(response.header("Retry-After"), Some("30"));
    }

    #[test]
    fn test_allowed_headers_omit_retry_after() {
        let pairs = RateLimitHeaders::allowed(10, 4, 1).to_pairs();
        assert_eq!(pairs.len(), 3);
        assert!(pairs.iter().all(|(name, _)| *name != "Retry-After"));
    }

    #[test]
    fn test_into_core_error() {
        let err = RateLimitError::LimitExceeded {
            limit: 1,
            reset_at: 0,
            retry_after: Duration::from_secs(1),
        };
        assert!(err.is_limit_exceeded());
        let core: swiftapi_core::Error = err.into();
        assert_eq!(core.status_code().as_u16(), 429);
    }
}
