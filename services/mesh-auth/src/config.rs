//! Type-Safe Configuration with Validation
//!
//! Settings come either from environment variables (`Config::from_env`) or
//! from a structured file (`Config::from_file`). Server secrets live in the
//! `backend.auth.keys` array of the file, or in the comma-separated
//! `BACKEND_AUTH_KEYS` variable.

use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::identity::jwk_cache::DEFAULT_KEY_SET_COOLDOWN;
use crate::identity::verifier::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW, PLATFORM_AUDIENCE};

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid URL format
    #[error("Invalid URL for {field}: {reason}")]
    InvalidUrl {
        /// Offending setting
        field: String,
        /// Parser message
        reason: String,
    },

    /// Invalid cooldown value
    #[error("Invalid key set cooldown: must be greater than 0")]
    InvalidCooldown,

    /// Clock skew above [`MAX_CLOCK_SKEW`]
    #[error("Invalid clock skew: {secs}s exceeds the {max}s limit")]
    InvalidClockSkew {
        /// Configured seconds
        secs: u64,
        /// Largest accepted value
        max: u64,
    },

    /// Missing required field
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    /// Environment variable parse error
    #[error("Failed to parse environment variable {name}: {reason}")]
    ParseError {
        /// Variable name
        name: String,
        /// Parser message
        reason: String,
    },

    /// Structured configuration file could not be read
    #[error("Failed to load configuration file: {reason}")]
    File {
        /// Loader message
        reason: String,
    },
}

/// Deployment mode. Only `production` is strict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Production: missing secrets are fatal and no key material is generated
    Production,
    /// Anything else
    #[default]
    Development,
}

impl Environment {
    /// Classifies a mode string. Only `production` (any case) is production.
    #[must_use]
    pub fn from_mode(mode: &str) -> Self {
        if mode.trim().eq_ignore_ascii_case("production") {
            Self::Production
        } else {
            Self::Development
        }
    }

    /// Returns true in production.
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Service configuration with validation.
#[derive(Debug, Clone)]
pub struct Config {
    /// Deployment mode
    pub environment: Environment,
    /// Base64url-encoded shared secrets, primary first
    pub server_keys: Vec<String>,
    /// Expected `iss` of user identity tokens
    pub auth_issuer: String,
    /// Base URL handed to host discovery
    pub discovery_base_url: Url,
    /// Expected `aud` of user identity tokens
    pub identity_audience: String,
    /// Asymmetric algorithms accepted for user identity tokens
    pub identity_algorithms: Vec<String>,
    /// Minimum seconds between two key-set refreshes (must be > 0)
    pub key_set_cooldown_secs: u64,
    /// Tolerated clock skew in seconds
    pub clock_skew_secs: u64,
    /// Log filter used when `RUST_LOG` is unset
    pub log_level: String,
    /// Emit JSON logs
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            server_keys: Vec::new(),
            auth_issuer: "http://localhost:7007/api/auth".to_string(),
            discovery_base_url: Url::parse("http://localhost:7007")
                .unwrap_or_else(|_| unreachable!("static URL is valid")),
            identity_audience: PLATFORM_AUDIENCE.to_string(),
            identity_algorithms: vec!["ES256".to_string()],
            key_set_cooldown_secs: DEFAULT_KEY_SET_COOLDOWN.as_secs(),
            clock_skew_secs: DEFAULT_CLOCK_SKEW.as_secs(),
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl Config {
    /// Loads configuration from environment variables with validation.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or validation fails.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            environment: Environment::from_mode(&env::var("MESH_ENV").unwrap_or_default()),
            server_keys: parse_list_env("BACKEND_AUTH_KEYS"),
            auth_issuer: env::var("AUTH_ISSUER").unwrap_or(defaults.auth_issuer),
            discovery_base_url: parse_url_env("DISCOVERY_BASE_URL", "http://localhost:7007")?,
            identity_audience: env::var("IDENTITY_AUDIENCE").unwrap_or(defaults.identity_audience),
            identity_algorithms: {
                let algorithms = parse_list_env("IDENTITY_ALGORITHMS");
                if algorithms.is_empty() {
                    defaults.identity_algorithms
                } else {
                    algorithms
                }
            },
            key_set_cooldown_secs: parse_env("JWKS_REFRESH_COOLDOWN", defaults.key_set_cooldown_secs)?,
            clock_skew_secs: parse_env("CLOCK_SKEW", defaults.clock_skew_secs)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_json: parse_env("LOG_JSON", false)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a structured file (TOML, YAML or JSON).
    ///
    /// Variables prefixed with `MESH__` override file values, using `__` as
    /// the path separator (`MESH__AUTH__ISSUER` sets `auth.issuer`). The
    /// `MESH_ENV` mode flag read by [`Config::from_env`] is honored here too
    /// and takes precedence over the file's `env`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or validation fails.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("MESH").separator("__"))
            .build()
            .and_then(|settings| settings.try_deserialize::<FileSettings>())
            .map_err(|e| ConfigError::File {
                reason: e.to_string(),
            })?;

        let config = settings.into_config(env::var("MESH_ENV").ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.key_set_cooldown_secs == 0 {
            return Err(ConfigError::InvalidCooldown);
        }
        if self.clock_skew_secs > MAX_CLOCK_SKEW.as_secs() {
            return Err(ConfigError::InvalidClockSkew {
                secs: self.clock_skew_secs,
                max: MAX_CLOCK_SKEW.as_secs(),
            });
        }
        if self.auth_issuer.trim().is_empty() {
            return Err(ConfigError::MissingRequired("auth issuer".to_string()));
        }
        if self.identity_audience.trim().is_empty() {
            return Err(ConfigError::MissingRequired("identity audience".to_string()));
        }
        if self.identity_algorithms.is_empty() {
            return Err(ConfigError::MissingRequired("identity algorithms".to_string()));
        }
        Ok(())
    }

    /// Minimum time between key-set refreshes.
    #[must_use]
    pub const fn key_set_cooldown(&self) -> Duration {
        Duration::from_secs(self.key_set_cooldown_secs)
    }

    /// Tolerated clock skew.
    #[must_use]
    pub const fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew_secs)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileSettings {
    env: Option<String>,
    backend: BackendSection,
    auth: AuthSection,
    discovery: DiscoverySection,
    log: LogSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BackendSection {
    auth: BackendAuthSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BackendAuthSection {
    keys: Vec<KeyEntry>,
}

#[derive(Debug, Deserialize)]
struct KeyEntry {
    secret: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AuthSection {
    issuer: Option<String>,
    audience: Option<String>,
    algorithms: Option<Vec<String>>,
    key_set_cooldown_secs: Option<u64>,
    clock_skew_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DiscoverySection {
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LogSection {
    level: Option<String>,
    json: Option<bool>,
}

impl FileSettings {
    fn into_config(self, mode: Option<String>) -> Result<Config, ConfigError> {
        let defaults = Config::default();
        let discovery_base_url = match self.discovery.base_url {
            Some(raw) => Url::parse(&raw).map_err(|e| ConfigError::InvalidUrl {
                field: "discovery.base_url".to_string(),
                reason: e.to_string(),
            })?,
            None => defaults.discovery_base_url,
        };

        Ok(Config {
            environment: mode
                .or(self.env)
                .as_deref()
                .map_or(Environment::Development, Environment::from_mode),
            server_keys: self
                .backend
                .auth
                .keys
                .into_iter()
                .map(|entry| entry.secret)
                .collect(),
            auth_issuer: self.auth.issuer.unwrap_or(defaults.auth_issuer),
            discovery_base_url,
            identity_audience: self.auth.audience.unwrap_or(defaults.identity_audience),
            identity_algorithms: self
                .auth
                .algorithms
                .unwrap_or(defaults.identity_algorithms),
            key_set_cooldown_secs: self
                .auth
                .key_set_cooldown_secs
                .unwrap_or(defaults.key_set_cooldown_secs),
            clock_skew_secs: self.auth.clock_skew_secs.unwrap_or(defaults.clock_skew_secs),
            log_level: self.log.level.unwrap_or(defaults.log_level),
            log_json: self.log.json.unwrap_or(defaults.log_json),
        })
    }
}

/// Parse an environment variable with a default value.
fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val.parse().map_err(|e: T::Err| ConfigError::ParseError {
            name: name.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Parse a URL environment variable with a default value.
fn parse_url_env(name: &str, default: &str) -> Result<Url, ConfigError> {
    let url_str = env::var(name).unwrap_or_else(|_| default.to_string());
    Url::parse(&url_str).map_err(|e| ConfigError::InvalidUrl {
        field: name.to_string(),
        reason: e.to_string(),
    })
}

/// Parse a comma-separated list environment variable, dropping empty items.
fn parse_list_env(name: &str) -> Vec<String> {
    env::var(name)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
