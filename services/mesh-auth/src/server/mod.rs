//! Shared-secret tokens for service-to-service calls.

pub mod key_store;
pub mod manager;

pub use key_store::{KeyStore, VerificationKey};
pub use manager::{
    NoopTokenManager, SERVER_TOKEN_SUBJECT, ServerToken, ServerTokenManager,
    ServerTokenManagerOptions, TokenManager, ensure_secure,
};
