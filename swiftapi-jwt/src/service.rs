// JWT signing and verification

use crate::{Claims, JwtConfig, JwtError, Result};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, decode, decode_header, encode};
use serde::{Serialize, de::DeserializeOwned};
use swiftapi_core::logging::debug;

/// Signs and verifies tokens for one [`JwtConfig`].
///
/// Keys are parsed once, when the service is created.
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    signing: (Algorithm, EncodingKey),
    verifying: Vec<(Algorithm, DecodingKey)>,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Result<Self> {
        let algorithm = config.signing_algorithm()?;
        let signing = (algorithm, config.encoding_key(algorithm)?);
        let verifying = config
            .algorithms
            .iter()
            .map(|&alg| config.decoding_key(alg).map(|key| (alg, key)))
            .collect::<Result<Vec<_>>>()?;

        debug!(algorithms = ?config.algorithms, "JWT service created");
        Ok(Self {
            config,
            signing,
            verifying,
        })
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    /// Sign any serializable claims with the first allowed algorithm
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String> {
        let (algorithm, key) = &self.signing;
        encode(&Header::new(*algorithm), claims, key).map_err(JwtError::from)
    }

    /// Sign claims for `subject` expiring after the configured lifetime
    pub fn issue(&self, subject: impl Into<String>) -> Result<String> {
        let mut claims = Claims::new(subject, self.config.expires_in);
        if let Some(iss) = self.config.issuers.first() {
            claims = claims.with_issuer(iss.clone());
        }
        if let Some(aud) = self.config.audiences.first() {
            claims = claims.with_audience(aud.clone());
        }
        self.sign(&claims)
    }

    /// Verify a token and decode its claims.
    ///
    /// The header's algorithm must be in the allow-list; the signature,
    /// `exp` (required), issuer and audience are then checked.
    pub fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<T> {
        let header = decode_header(token).map_err(|e| JwtError::InvalidToken(e.to_string()))?;
        let key = self
            .verifying
            .iter()
            .find(|(alg, _)| *alg == header.alg)
            .map(|(_, key)| key)
            .ok_or(JwtError::AlgorithmNotAllowed(header.alg))?;

        decode::<T>(token, key, &self.config.validation(header.alg))
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => JwtError::TokenExpired,
                ErrorKind::InvalidSignature => JwtError::InvalidSignature,
                ErrorKind::MissingRequiredClaim(claim) => JwtError::MissingClaim(claim.clone()),
                ErrorKind::InvalidIssuer => JwtError::IssuerNotAllowed,
                ErrorKind::InvalidAudience => JwtError::AudienceNotAllowed,
                _ => JwtError::InvalidToken(e.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::time::Duration;

    fn service() -> JwtService {
        JwtService::new(JwtConfig::new("test-secret")).unwrap()
    }

    #[test]
    fn test_sign_and_verify() {
        let service = service();
        let token = service
            .sign(&Claims::new("user123", Duration::from_secs(60)).with_claim("role", "admin"))
            .unwrap();

        let claims: Claims = service.verify(&token).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("user123"));
        assert_eq!(claims.claim("role"), Some(&Value::from("admin")));
    }

    #[test]
    fn test_expired_token() {
        let service = service();
        let claims = Claims::new("user123", Duration::from_secs(60))
            .expires_at(chrono::Utc::now().timestamp() - 3600);
        let token = service.sign(&claims).unwrap();

        assert!(matches!(service.verify::<Claims>(&token), Err(JwtError::TokenExpired)));
    }

    #[test]
    fn test_missing_exp_is_rejected() {
        let service = service();
        let token = service.sign(&serde_json::json!({"sub": "user123"})).unwrap();

        assert!(matches!(
            service.verify::<Value>(&token),
            Err(JwtError::MissingClaim(claim)) if claim == "exp"
        ));
    }

    #[test]
    fn test_wrong_secret() {
        let token = service().issue("user123").unwrap();
        let other = JwtService::new(JwtConfig::new("another-secret")).unwrap();

        assert!(matches!(other.verify::<Claims>(&token), Err(JwtError::InvalidSignature)));
    }

    #[test]
    fn test_algorithm_allow_list() {
        let hs512 = JwtService::new(JwtConfig::new("s").with_algorithms([Algorithm::HS512])).unwrap();
        let token = hs512.issue("user123").unwrap();

        assert!(matches!(
            service().verify::<Claims>(&token),
            Err(JwtError::AlgorithmNotAllowed(Algorithm::HS512))
        ));

        let both = JwtService::new(
            JwtConfig::new("s").with_algorithms([Algorithm::HS256, Algorithm::HS512]),
        )
        .unwrap();
        assert!(both.verify::<Claims>(&token).is_ok());
    }

    #[test]
    fn test_issuer_and_audience_allow_lists() {
        let config = JwtConfig::new("s")
            .with_issuers(["auth.example.com", "legacy-auth"])
            .with_audiences(["api"]);
        let service = JwtService::new(config).unwrap();

        let ok = Claims::new("u", Duration::from_secs(60))
            .with_issuer("legacy-auth")
            .with_audience("api");
        assert!(service.verify::<Claims>(&service.sign(&ok).unwrap()).is_ok());

        let bad_issuer = ok.clone().with_issuer("evil");
        assert!(matches!(
            service.verify::<Claims>(&service.sign(&bad_issuer).unwrap()),
            Err(JwtError::IssuerNotAllowed)
        ));

        let bad_audience = ok.with_audience("web");
        assert!(matches!(
            service.verify::<Claims>(&service.sign(&bad_audience).unwrap()),
            Err(JwtError::AudienceNotAllowed)
        ));
    }

    #[test]
    fn test_garbage_token() {
        assert!(matches!(
            service().verify::<Claims>("not.a.token"),
            Err(JwtError::InvalidToken(_))
        ));
    }
}
