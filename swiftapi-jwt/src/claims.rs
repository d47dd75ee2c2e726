// JWT claims

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Registered claims (RFC 7519) plus any application claims.
///
/// `exp` is mandatory: tokens without it are rejected by
/// [`BearerAuth`](crate::BearerAuth).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    /// Application claims, serialized alongside the registered ones
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    /// Claims for `subject`, issued now and expiring after `ttl`
    pub fn new(subject: impl Into<String>, ttl: Duration) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: Some(subject.into()),
            iss: None,
            aud: None,
            exp: now.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)),
            nbf: None,
            iat: Some(now),
            jti: None,
            extra: Map::new(),
        }
    }

    pub fn with_issuer(mut self, iss: impl Into<String>) -> Self {
        self.iss = Some(iss.into());
        self
    }

    pub fn with_audience(mut self, aud: impl Into<String>) -> Self {
        self.aud = Some(aud.into());
        self
    }

    /// Set an absolute expiration time
    pub fn expires_at(mut self, exp: i64) -> Self {
        self.exp = exp;
        self
    }

    pub fn with_not_before(mut self, nbf: i64) -> Self {
        self.nbf = Some(nbf);
        self
    }

    pub fn with_jwt_id(mut self, jti: impl Into<String>) -> Self {
        self.jti = Some(jti.into());
        self
    }

    /// Add an application claim
    pub fn with_claim(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn claim(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.exp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_claims_expire_after_ttl() {
        let claims = Claims::new("user123", Duration::from_secs(3600));
        let iat = claims.iat.unwrap();
        assert_eq!(claims.exp - iat, 3600);
        assert!(!claims.is_expired());

        let expired = claims.expires_at(iat - 10);
        assert!(expired.is_expired());
    }

    #[test]
    fn test_extra_claims_are_flattened() {
        let claims = Claims::new("user123", Duration::from_secs(60))
            .with_issuer("auth")
            .with_claim("role", "admin");

        let value = serde_json::to_value(&claims).unwrap();
        assert_eq!(value["role"], "admin");
        assert_eq!(value["iss"], "auth");
        assert!(value.get("aud").is_none());

        let back: Claims = serde_json::from_value(value).unwrap();
        assert_eq!(back.claim("role"), Some(&Value::from("admin")));
    }
}
