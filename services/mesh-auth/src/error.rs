//! Error handling for token issuance and verification.
//!
//! Three layers of failure exist:
//! - [`ConfigError`] while loading settings,
//! - [`KeyResolutionError`] inside the remote key-set cache,
//! - [`AuthError`] at the public boundary of both token engines.
//!
//! Key resolution failures never escape the identity verifier on their own:
//! they are wrapped into [`AuthError::Authentication`] so callers see one
//! uniform rejection type.

use rust_common::PlatformError;
use thiserror::Error;

use crate::config::ConfigError;

/// Patterns that must never reach a caller-facing message.
const SENSITIVE_PATTERNS: &[&str] = &[
    "secret",
    "token",
    "key",
    "credential",
    "bearer",
    "authorization",
    "private",
];

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error returned by the server token manager and the identity verifier.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum AuthError {
    /// Required configuration is missing or invalid
    #[error("Configuration error: {reason}")]
    Configuration {
        /// What is wrong with the configuration
        reason: String,
    },

    /// The presented token was rejected
    #[error("Authentication failed: {reason}")]
    Authentication {
        /// Why the token was rejected
        reason: String,
        /// Underlying verification failure, if any
        #[source]
        source: Option<BoxError>,
    },

    /// Internal error (details sanitized in responses)
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Failure to resolve a verification key from the remote key set.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum KeyResolutionError {
    /// The key id is not in the key set, even after any permitted refresh
    #[error("No key with id {kid} in the remote key set")]
    KeyNotFound {
        /// Requested key id
        kid: String,
    },

    /// Fetching the key-set document failed
    #[error("Failed to fetch key set from {url}")]
    Fetch {
        /// Document URL
        url: String,
        /// Transport failure
        #[source]
        source: PlatformError,
    },

    /// The key-set document could not be understood
    #[error("Key set document malformed: {reason}")]
    MalformedKeySet {
        /// Decoding failure description
        reason: String,
    },

    /// Discovery could not produce a base URL
    #[error("Discovery failed for {plugin_id}: {reason}")]
    Discovery {
        /// Plugin whose location was requested
        plugin_id: String,
        /// Failure description
        reason: String,
    },
}

/// Stable error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Configuration is missing or invalid
    ConfigurationError,
    /// Token rejected
    AuthenticationFailed,
    /// Unexpected internal failure
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigurationError => "AUTH_CONFIGURATION_ERROR",
            Self::AuthenticationFailed => "AUTH_AUTHENTICATION_FAILED",
            Self::Internal => "INTERNAL_ERROR",
        }
    }
}

impl AuthError {
    /// Builds an authentication error without an underlying cause.
    #[must_use]
    pub fn authentication(reason: impl Into<String>) -> Self {
        Self::Authentication {
            reason: reason.into(),
            source: None,
        }
    }

    /// Builds an authentication error wrapping `source`.
    #[must_use]
    pub fn authentication_with<E>(reason: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Authentication {
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Builds a configuration error.
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Get the error code for this error
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Configuration { .. } => ErrorCode::ConfigurationError,
            Self::Authentication { .. } => ErrorCode::AuthenticationFailed,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Returns true when the error is a token rejection.
    #[must_use]
    pub const fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Message safe to show to the presenter of a token.
    ///
    /// Causes are dropped and internal details never leave the process.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Authentication { reason, .. } => sanitize_message(reason),
            Self::Configuration { .. } => "Authentication is misconfigured".to_string(),
            Self::Internal(_) => "Internal error".to_string(),
        }
    }
}

impl From<ConfigError> for AuthError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration {
            reason: err.to_string(),
        }
    }
}

impl From<KeyResolutionError> for AuthError {
    fn from(err: KeyResolutionError) -> Self {
        Self::authentication_with("unable to resolve verification key", err)
    }
}

/// Sanitize a message by removing sensitive information
fn sanitize_message(message: &str) -> String {
    if contains_sensitive_info(message) {
        return "Invalid credentials".to_string();
    }
    message.to_string()
}

/// Check if a string contains sensitive information
#[must_use]
pub fn contains_sensitive_info(text: &str) -> bool {
    let lower = text.to_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AuthError::configuration("no keys").code().as_str(),
            "AUTH_CONFIGURATION_ERROR"
        );
        assert_eq!(
            AuthError::authentication("bad").code().as_str(),
            "AUTH_AUTHENTICATION_FAILED"
        );
        assert_eq!(
            AuthError::Internal(anyhow::anyhow!("boom")).code().as_str(),
            "INTERNAL_ERROR"
        );
    }

    #[test]
    fn test_key_resolution_is_wrapped_as_authentication() {
        let err: AuthError = KeyResolutionError::KeyNotFound {
            kid: "k-1".to_string(),
        }
        .into();

        assert!(err.is_authentication());
        let source = err.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("No key with id k-1 in the remote key set"));
    }

    #[test]
    fn test_public_message_hides_internals() {
        let err = AuthError::Internal(anyhow::anyhow!("db password=hunter2"));
        assert_eq!(err.public_message(), "Internal error");

        let err = AuthError::configuration("backend.auth.keys missing");
        assert_eq!(err.public_message(), "Authentication is misconfigured");
    }

    #[test]
    fn test_public_message_sanitizes_sensitive_reasons() {
        let err = AuthError::authentication("signing key mismatch");
        assert_eq!(err.public_message(), "Invalid credentials");

        let err = AuthError::authentication("issuer mismatch");
        assert_eq!(err.public_message(), "issuer mismatch");
    }

    #[test]
    fn test_contains_sensitive_info() {
        assert!(contains_sensitive_info("Bearer abc"));
        assert!(contains_sensitive_info("SECRET value"));
        assert!(!contains_sensitive_info("audience mismatch"));
    }
}
