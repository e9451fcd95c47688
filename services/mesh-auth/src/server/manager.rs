//! Issuing and verifying service-to-service tokens.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use jsonwebtoken::{Algorithm, EncodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::{Config, Environment};
use crate::error::AuthError;
use crate::metrics::AuthMetrics;
use crate::server::key_store::{BASE64URL, KeyStore};

/// Subject of every server token.
pub const SERVER_TOKEN_SUBJECT: &str = "mesh-server";

/// A signed service-to-service token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerToken {
    /// Compact JWT
    pub token: String,
}

impl std::fmt::Debug for ServerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerToken")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ServerClaims {
    sub: String,
}

/// Protected header of a server token. Carries the subject next to the
/// algorithm, which `jsonwebtoken::Header` has no field for.
#[derive(Debug, Serialize)]
struct ServerHeader {
    alg: &'static str,
    typ: &'static str,
    sub: &'static str,
}

fn sign_server_token(key: &EncodingKey) -> anyhow::Result<String> {
    let header = ServerHeader {
        alg: "HS256",
        typ: "JWT",
        sub: SERVER_TOKEN_SUBJECT,
    };
    let claims = ServerClaims {
        sub: SERVER_TOKEN_SUBJECT.to_string(),
    };

    let message = format!(
        "{}.{}",
        BASE64URL.encode(serde_json::to_vec(&header)?),
        BASE64URL.encode(serde_json::to_vec(&claims)?)
    );
    let signature = jsonwebtoken::crypto::sign(message.as_bytes(), key, Algorithm::HS256)?;
    Ok(format!("{message}.{signature}"))
}

/// Issues tokens for outgoing calls and checks tokens on incoming ones.
#[async_trait]
pub trait TokenManager: Send + Sync {
    /// Returns a token to attach to an outgoing request.
    async fn get_token(&self) -> Result<ServerToken, AuthError>;

    /// Accepts or rejects a token presented by a peer service.
    async fn authenticate(&self, token: &str) -> Result<(), AuthError>;

    /// True for managers that perform no verification at all.
    fn is_insecure(&self) -> bool {
        false
    }
}

/// Refuses an insecure manager in production.
///
/// # Errors
///
/// Returns [`AuthError::Configuration`] when `manager` is insecure and
/// `environment` is production.
pub fn ensure_secure(manager: &dyn TokenManager, environment: Environment) -> Result<(), AuthError> {
    if manager.is_insecure() && environment.is_production() {
        return Err(AuthError::configuration(
            "an insecure token manager cannot be used in production",
        ));
    }
    Ok(())
}

/// Options for [`ServerTokenManager`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerTokenManagerOptions {
    /// Deployment mode; production forbids running without secrets
    pub environment: Environment,
}

/// HS256 token manager over a set of shared secrets.
///
/// Tokens are signed with the first secret and accepted if any secret
/// verifies them, which allows rolling a new secret in ahead of its use.
#[derive(Debug)]
pub struct ServerTokenManager {
    store: KeyStore,
    metrics: Option<Arc<AuthMetrics>>,
}

impl ServerTokenManager {
    /// Creates a manager from base64url secrets, primary first.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if a secret is invalid, or if no
    /// secrets are given in production.
    pub fn new(secrets: &[String], options: ServerTokenManagerOptions) -> Result<Self, AuthError> {
        Ok(Self {
            store: KeyStore::from_secrets(secrets, options.environment)?,
            metrics: None,
        })
    }

    /// Creates a manager from loaded configuration.
    ///
    /// # Errors
    ///
    /// See [`ServerTokenManager::new`].
    pub fn from_config(config: &Config) -> Result<Self, AuthError> {
        Self::new(
            &config.server_keys,
            ServerTokenManagerOptions {
                environment: config.environment,
            },
        )
    }

    /// A manager that issues empty tokens and accepts everything.
    #[must_use]
    pub const fn noop() -> NoopTokenManager {
        NoopTokenManager
    }

    /// Records issuance and verification outcomes.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<AuthMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Number of verification keys currently held.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.store.len()
    }

    fn validation() -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["sub"]);
        validation.validate_aud = false;
        validation
    }

    fn verify(&self, token: &str) -> Result<(), AuthError> {
        let keys = self.store.verification_keys();
        if keys.is_empty() {
            return Err(AuthError::authentication("no server token keys available"));
        }

        let mut last_error = None;
        for key in keys {
            match key.scheme().verify::<ServerClaims>(token, Self::validation()) {
                Ok(_) => return Ok(()),
                Err(e) => last_error = Some(e),
            }
        }

        Err(match last_error {
            Some(e) => AuthError::authentication_with("invalid server token", e),
            None => AuthError::authentication("invalid server token"),
        })
    }
}

#[async_trait]
impl TokenManager for ServerTokenManager {
    #[instrument(skip(self))]
    async fn get_token(&self) -> Result<ServerToken, AuthError> {
        let key = self.store.signing_key()?;
        let token = sign_server_token(&key.encoding_key())
            .map_err(|e| AuthError::Internal(e.context("failed to sign server token")))?;

        if let Some(metrics) = &self.metrics {
            metrics.server_tokens_issued.inc();
        }
        Ok(ServerToken { token })
    }

    #[instrument(skip_all)]
    async fn authenticate(&self, token: &str) -> Result<(), AuthError> {
        let result = self.verify(token);
        if let Err(e) = &result {
            debug!(error = %e, "Server token rejected");
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_server_verification(result.is_ok());
        }
        result
    }
}

/// Token manager for local, insecure setups.
///
/// Issues empty tokens and accepts every token. [`TokenManager::is_insecure`]
/// reports `true` so callers can refuse it where security matters.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTokenManager;

#[async_trait]
impl TokenManager for NoopTokenManager {
    async fn get_token(&self) -> Result<ServerToken, AuthError> {
        Ok(ServerToken {
            token: String::new(),
        })
    }

    async fn authenticate(&self, _token: &str) -> Result<(), AuthError> {
        Ok(())
    }

    fn is_insecure(&self) -> bool {
        true
    }
}
