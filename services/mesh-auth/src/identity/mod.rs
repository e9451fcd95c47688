//! Verification of user identity tokens signed by the auth plugin.

pub mod claims;
pub mod discovery;
pub mod jwk_cache;
pub mod verifier;

pub use claims::{AuthenticatedUser, IdentityClaims, IdentityKind, UserIdentity};
pub use discovery::{Discovery, HostDiscovery};
pub use jwk_cache::{
    DEFAULT_KEY_SET_COOLDOWN, HttpKeySetFetcher, Jwk, Jwks, KeySetFetcher, RemoteKeySetCache,
};
pub use verifier::{
    DEFAULT_CLOCK_SKEW, IdentityTokenVerifier, IdentityVerifierOptions, MAX_CLOCK_SKEW,
    PLATFORM_AUDIENCE, bearer_token,
};
