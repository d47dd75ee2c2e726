// Error types for JWT operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum JwtError {
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Unauthorized")]
    MissingCredentials,

    #[error("Invalid authorization format")]
    InvalidFormat,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Signing algorithm not allowed: {0:?}")]
    AlgorithmNotAllowed(jsonwebtoken::Algorithm),

    #[error("Missing claim: {0}")]
    MissingClaim(String),

    #[error("Issuer not allowed")]
    IssuerNotAllowed,

    #[error("Audience not allowed")]
    AudienceNotAllowed,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, JwtError>;

impl JwtError {
    /// Whether the caller's credentials were at fault, as opposed to the
    /// server's key setup.
    pub fn is_credential_error(&self) -> bool {
        !matches!(self, JwtError::ConfigError(_))
    }
}

impl From<JwtError> for swiftapi_core::Error {
    fn from(err: JwtError) -> Self {
        if err.is_credential_error() {
            swiftapi_core::Error::Unauthorized(err.to_string())
        } else {
            swiftapi_core::Error::Config(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_to_core_error() {
        let err: swiftapi_core::Error = JwtError::TokenExpired.into();
        assert_eq!(err.status_code().as_u16(), 401);
        assert_eq!(err.public_message(), "Unauthorized: Token expired");

        let err: swiftapi_core::Error = JwtError::ConfigError("no key".into()).into();
        assert_eq!(err.status_code().as_u16(), 500);
    }
}
