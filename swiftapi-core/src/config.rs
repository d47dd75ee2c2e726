// Application configuration
//
// Sources, later ones winning: built-in defaults, a TOML document, then
// `SWIFTAPI_*` environment variables (optionally seeded from a `.env` file).

use crate::Error;
use crate::logging::{LogConfig, debug};
use crate::routing::MethodMismatch;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

/// Prefix of every environment variable read by [`AppConfig::apply_env`]
pub const ENV_PREFIX: &str = "SWIFTAPI_";

/// Server and pipeline settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted request body in bytes; larger bodies get 413
    pub max_body_size: usize,
    pub method_mismatch: MethodMismatch,
    /// Install the request logger (request ids, access log, panic recovery)
    /// around the whole router
    pub request_logging: bool,
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_body_size: 10 * 1024 * 1024,
            method_mismatch: MethodMismatch::default(),
            request_logging: true,
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(source: &str) -> Result<Self, Error> {
        toml::from_str(source).map_err(|e| Error::Config(format!("invalid TOML configuration: {e}")))
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read configuration '{}': {e}", path.display()))
        })?;
        debug!(path = %path.display(), "Loaded configuration file");
        Self::from_toml_str(&source)
    }

    /// Defaults overridden by the environment. A `.env` file in the working
    /// directory is loaded first if there is one.
    pub fn from_env() -> Result<Self, Error> {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        config.apply_env(std::env::vars())?;
        Ok(config)
    }

    /// Override fields from `SWIFTAPI_*` variables. Unknown variables are
    /// ignored; malformed values are errors.
    pub fn apply_env<I, K, V>(&mut self, vars: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();
            match name {
                "HOST" => self.host = value.to_string(),
                "PORT" => self.port = parse_env(name, value)?,
                "MAX_BODY_SIZE" => self.max_body_size = parse_env(name, value)?,
                "METHOD_MISMATCH" => {
                    self.method_mismatch = match value.to_ascii_lowercase().as_str() {
                        "first_path_match" => MethodMismatch::FirstPathMatch,
                        "collect_path_matches" => MethodMismatch::CollectPathMatches,
                        other => {
                            return Err(Error::Config(format!(
                                "{ENV_PREFIX}METHOD_MISMATCH: unknown policy '{other}'"
                            )));
                        }
                    }
                }
                "REQUEST_LOGGING" => self.request_logging = parse_env(name, value)?,
                "LOG_LEVEL" => self.log.level = value.parse()?,
                "LOG_FORMAT" => self.log.format = value.parse()?,
                "LOG_FILTER" => self.log.env_filter = Some(value.to_string()),
                _ => continue,
            }
            debug!(variable = %key.as_ref(), "Configuration overridden from environment");
        }
        Ok(())
    }

    /// Address to listen on
    pub fn socket_addr(&self) -> Result<SocketAddr, Error> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid listen address {}:{}: {e}", self.host, self.port)))
    }
}

fn parse_env<T>(name: &str, value: &str) -> Result<T, Error>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::Config(format!("{ENV_PREFIX}{name}: invalid value '{value}': {e}")))
}
