// Bearer-token authentication middleware

use crate::{JwtConfig, JwtError, JwtService, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use swiftapi_core::logging::{trace, warn};
use swiftapi_core::{Error, HttpRequest, HttpResponse, Middleware, Next};

/// Request-context key the verified claims are stored under
pub const CLAIMS_KEY: &str = "claims";

/// Rejects requests without a valid `Authorization: Bearer <token>` header
/// with 401. On success the token's claims are stored as a
/// `serde_json::Value` under [`CLAIMS_KEY`], so handlers can take them as
/// `Context<Value>` named `claims`.
///
/// Usually installed with `Application::set_authorization`, so it runs on
/// every group that requires authorization.
#[derive(Clone)]
pub struct BearerAuth {
    service: Arc<JwtService>,
}

impl BearerAuth {
    pub fn new(service: Arc<JwtService>) -> Self {
        Self { service }
    }

    pub fn from_config(config: JwtConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(JwtService::new(config)?)))
    }

    pub fn service(&self) -> &Arc<JwtService> {
        &self.service
    }

    /// Extract the token from an `Authorization` header value. Exactly two
    /// space-separated parts are accepted, the first being `Bearer`.
    pub fn token_from_header(header: &str) -> Result<&str> {
        let mut parts = header.split(' ');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("Bearer"), Some(token), None) if !token.is_empty() => Ok(token),
            _ => Err(JwtError::InvalidFormat),
        }
    }

    /// Verify the request's credentials and return the claims.
    pub fn authenticate(&self, req: &HttpRequest) -> Result<Value> {
        let header = req
            .header("authorization")
            .filter(|h| !h.is_empty())
            .ok_or(JwtError::MissingCredentials)?;
        let token = Self::token_from_header(header)?;
        self.service.verify::<Value>(token)
    }
}

#[async_trait]
impl Middleware for BearerAuth {
    async fn handle(&self, mut req: HttpRequest, next: Next) -> std::result::Result<HttpResponse, Error> {
        match self.authenticate(&req) {
            Ok(claims) => {
                trace!(path = %req.path, "Bearer token accepted");
                req.set_context(CLAIMS_KEY, claims);
                next(req).await
            }
            Err(e) => {
                warn!(method = %req.method, path = %req.path, reason = %e, "Authentication failed");
                Err(e.into())
            }
        }
    }
}
