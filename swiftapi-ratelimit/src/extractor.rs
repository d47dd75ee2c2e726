//! Key extraction for rate limiting
//!
//! Strategies for deriving the limiter key from an incoming request.

use std::fmt;
use std::sync::Arc;
use swiftapi_core::HttpRequest;

/// Type alias for key extractor function
pub type KeyExtractorFn = Arc<dyn Fn(&HttpRequest) -> Option<String> + Send + Sync>;

/// Key extraction strategies
#[derive(Clone, Default)]
pub enum KeyExtractor {
    /// The client's IP address
    #[default]
    Ip,
    /// First `X-Forwarded-For` entry, falling back to the peer address.
    /// Only use behind a proxy that sets the header.
    ForwardedIp,
    /// Value of a request header, such as an API key
    Header(String),
    /// Custom extraction function
    Custom(KeyExtractorFn),
}

impl KeyExtractor {
    pub fn header(name: impl Into<String>) -> Self {
        Self::Header(name.into())
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&HttpRequest) -> Option<String> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Key for `req`, or `None` when the request carries nothing to key on
    pub fn extract(&self, req: &HttpRequest) -> Option<String> {
        match self {
            KeyExtractor::Ip => peer_ip(req),
            KeyExtractor::ForwardedIp => req
                .header("x-forwarded-for")
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
                .map(str::to_string)
                .or_else(|| peer_ip(req)),
            KeyExtractor::Header(name) => req
                .header(name)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
            KeyExtractor::Custom(f) => f(req),
        }
    }
}

fn peer_ip(req: &HttpRequest) -> Option<String> {
    req.remote_addr.map(|addr| addr.ip().to_string())
}

impl fmt::Debug for KeyExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyExtractor::Ip => write!(f, "Ip"),
            KeyExtractor::ForwardedIp => write!(f, "ForwardedIp"),
            KeyExtractor::Header(name) => write!(f, "Header({name})"),
            KeyExtractor::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> HttpRequest {
        HttpRequest::new("GET", "/").with_remote_addr("192.168.1.7:40000".parse().unwrap())
    }

    #[test]
    fn test_ip_ignores_port() {
        assert_eq!(KeyExtractor::Ip.extract(&request()), Some("192.168.1.7".to_string()));
        assert_eq!(KeyExtractor::Ip.extract(&HttpRequest::new("GET", "/")), None);
    }

    #[test]
    fn test_forwarded_ip() {
        let req = request().with_header("X-Forwarded-For", "203.0.113.9, 10.0.0.1");
        assert_eq!(
            KeyExtractor::ForwardedIp.extract(&req),
            Some("203.0.113.9".to_string())
        );
        assert_eq!(
            KeyExtractor::ForwardedIp.extract(&request()),
            Some("192.168.1.7".to_string())
        );
    }

    #[test]
    fn test_header_and_custom() {
        let req = request().with_header("X-Api-Key", "key-1");
        assert_eq!(
            KeyExtractor::header("x-api-key").extract(&req),
            Some("key-1".to_string())
        );

        let by_path = KeyExtractor::custom(|req| Some(req.path.clone()));
        assert_eq!(by_path.extract(&req), Some("/".to_string()));
    }
}
