// JWT bearer authentication for SwiftAPI

pub mod claims;
pub mod config;
pub mod error;
pub mod middleware;
pub mod service;

pub use claims::Claims;
pub use config::JwtConfig;
pub use error::{JwtError, Result};
pub use middleware::{BearerAuth, CLAIMS_KEY};
pub use service::JwtService;

// Re-export jsonwebtoken types
pub use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
