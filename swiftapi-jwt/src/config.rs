// JWT configuration

use crate::{JwtError, Result};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// JWT configuration
///
/// `algorithms` is the allow-list checked against each token's header. The
/// first entry is used when signing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    /// Secret key for HS256/HS384/HS512 algorithms
    pub secret: Option<String>,

    /// Public key for RS*/ES* algorithms (PEM format)
    pub public_key: Option<String>,

    /// Private key for RS*/ES* algorithms (PEM format)
    pub private_key: Option<String>,

    pub algorithms: Vec<Algorithm>,

    /// Lifetime of tokens signed with [`Claims::new`](crate::Claims::new)
    /// defaults (default: 1 hour)
    pub expires_in: Duration,

    /// Accepted `iss` values; empty accepts any issuer
    pub issuers: Vec<String>,

    /// Accepted `aud` values; empty accepts any audience
    pub audiences: Vec<String>,

    /// Clock skew tolerated on `exp` and `nbf`, in seconds
    pub leeway: u64,
}

impl JwtConfig {
    /// HMAC configuration accepting HS256 only
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Some(secret.into()),
            ..Self::default()
        }
    }

    /// Configuration with RSA keys, accepting RS256 only
    pub fn with_rsa(private_key: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self {
            secret: None,
            public_key: Some(public_key.into()),
            private_key: Some(private_key.into()),
            algorithms: vec![Algorithm::RS256],
            ..Self::default()
        }
    }

    /// Replace the allow-list
    pub fn with_algorithms(mut self, algorithms: impl IntoIterator<Item = Algorithm>) -> Self {
        self.algorithms = algorithms.into_iter().collect();
        self
    }

    pub fn with_expiration(mut self, duration: Duration) -> Self {
        self.expires_in = duration;
        self
    }

    pub fn with_issuers<I, S>(mut self, issuers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issuers = issuers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_audiences<I, S>(mut self, audiences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.audiences = audiences.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_leeway(mut self, leeway: u64) -> Self {
        self.leeway = leeway;
        self
    }

    pub fn allows(&self, algorithm: Algorithm) -> bool {
        self.algorithms.contains(&algorithm)
    }

    /// Algorithm used for signing
    pub fn signing_algorithm(&self) -> Result<Algorithm> {
        self.algorithms
            .first()
            .copied()
            .ok_or_else(|| JwtError::ConfigError("no signing algorithm configured".to_string()))
    }

    fn secret(&self) -> Result<&[u8]> {
        self.secret
            .as_deref()
            .map(str::as_bytes)
            .ok_or_else(|| JwtError::ConfigError("Secret required for HMAC algorithms".to_string()))
    }

    fn pem(key: &Option<String>, which: &str) -> Result<Vec<u8>> {
        key.as_ref()
            .map(|k| k.as_bytes().to_vec())
            .ok_or_else(|| JwtError::ConfigError(format!("{which} key required for {which}-key algorithms")))
    }

    /// Key for signing with `algorithm`
    pub fn encoding_key(&self, algorithm: Algorithm) -> Result<EncodingKey> {
        let config_error = |e: jsonwebtoken::errors::Error| JwtError::ConfigError(e.to_string());
        match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                Ok(EncodingKey::from_secret(self.secret()?))
            }
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => {
                EncodingKey::from_rsa_pem(&Self::pem(&self.private_key, "Private")?).map_err(config_error)
            }
            Algorithm::ES256 | Algorithm::ES384 => {
                EncodingKey::from_ec_pem(&Self::pem(&self.private_key, "Private")?).map_err(config_error)
            }
            other => Err(JwtError::ConfigError(format!("Unsupported algorithm {other:?}"))),
        }
    }

    /// Key for verifying tokens signed with `algorithm`
    pub fn decoding_key(&self, algorithm: Algorithm) -> Result<DecodingKey> {
        let config_error = |e: jsonwebtoken::errors::Error| JwtError::ConfigError(e.to_string());
        match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                Ok(DecodingKey::from_secret(self.secret()?))
            }
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => {
                DecodingKey::from_rsa_pem(&Self::pem(&self.public_key, "Public")?).map_err(config_error)
            }
            Algorithm::ES256 | Algorithm::ES384 => {
                DecodingKey::from_ec_pem(&Self::pem(&self.public_key, "Public")?).map_err(config_error)
            }
            other => Err(JwtError::ConfigError(format!("Unsupported algorithm {other:?}"))),
        }
    }

    /// Validation rules for a token whose header names `algorithm`: the
    /// signature, a required unexpired `exp`, and the issuer and audience
    /// allow-lists when configured.
    pub fn validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.set_required_spec_claims(&["exp"]);
        validation.validate_exp = true;
        validation.leeway = self.leeway;

        if !self.issuers.is_empty() {
            validation.set_issuer(&self.issuers);
        }

        if self.audiences.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&self.audiences);
        }

        validation
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: None,
            public_key: None,
            private_key: None,
            algorithms: vec![Algorithm::HS256],
            expires_in: Duration::from_secs(3600),
            issuers: Vec::new(),
            audiences: Vec::new(),
            leeway: 0,
        }
    }
}
