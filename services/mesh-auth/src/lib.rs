//! Mesh Auth - token handling for the service mesh backend.
//!
//! This crate provides two independent token engines:
//! - a server token manager issuing and checking HS256 tokens over a set of
//!   shared secrets, for calls between backend instances;
//! - an identity token verifier checking asymmetric user tokens against the
//!   key set published by the auth plugin, with a cooldown-limited cache.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod scheme;
pub mod server;

pub use config::{Config, ConfigError, Environment};
pub use error::{AuthError, ErrorCode, KeyResolutionError};
pub use identity::{
    AuthenticatedUser, Discovery, HostDiscovery, IdentityTokenVerifier, IdentityVerifierOptions,
    UserIdentity,
};
pub use metrics::AuthMetrics;
pub use scheme::VerificationScheme;
pub use server::{NoopTokenManager, ServerToken, ServerTokenManager, TokenManager};
