//! Centralized error types for platform plumbing.
//!
//! Errors raised by shared HTTP infrastructure are collected here so that
//! domain crates can wrap them without losing the underlying cause.

use thiserror::Error;

/// Common error type for platform operations.
///
/// All errors are classified as either retryable or non-retryable,
/// which helps callers decide whether to retry failed operations.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote endpoint answered with a non-success status
    #[error("Unexpected HTTP status {status} from {url}")]
    Status {
        /// Status code returned by the remote endpoint
        status: u16,
        /// Requested URL
        url: String,
    },
}

impl PlatformError {
    /// Check if this error is retryable.
    ///
    /// Retryable errors are transient failures that may succeed on retry,
    /// such as connection failures, timeouts, 5xx answers and throttling.
    ///
    /// # Examples
    ///
    /// ```
    /// use rust_common::PlatformError;
    ///
    /// let err = PlatformError::status(503, "http://auth/jwks");
    /// assert!(err.is_retryable());
    ///
    /// let err = PlatformError::status(404, "http://auth/jwks");
    /// assert!(!err.is_retryable());
    /// ```
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status, .. } => *status >= 500 || *status == 429,
        }
    }

    /// Create a status error for the given URL.
    #[must_use]
    pub fn status(status: u16, url: impl Into<String>) -> Self {
        Self::Status {
            status,
            url: url.into(),
        }
    }
}
