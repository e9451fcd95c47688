//! Claims carried by user identity tokens and the identity derived from them.

use serde::{Deserialize, Serialize};

/// Audience claim, which may be a single string or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// Single audience
    Single(String),
    /// Several audiences
    Multiple(Vec<String>),
}

impl Audience {
    /// Returns true if `audience` is one of the listed audiences.
    #[must_use]
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Self::Single(aud) => aud == audience,
            Self::Multiple(auds) => auds.iter().any(|a| a == audience),
        }
    }
}

/// Payload of a user identity token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Issuer
    pub iss: String,
    /// Subject, the user entity reference
    pub sub: String,
    /// Audience
    pub aud: Audience,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Ownership entity references
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ent: Option<Vec<String>>,
}

/// Kind of authenticated principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    /// A human user
    #[default]
    User,
}

/// Identity of an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    /// Always [`IdentityKind::User`]
    #[serde(rename = "type")]
    pub kind: IdentityKind,
    /// Entity reference of the user
    pub user_entity_ref: String,
    /// Entities the user claims ownership through
    pub ownership_entity_refs: Vec<String>,
}

impl From<IdentityClaims> for UserIdentity {
    fn from(claims: IdentityClaims) -> Self {
        Self {
            kind: IdentityKind::User,
            user_entity_ref: claims.sub,
            ownership_entity_refs: claims.ent.unwrap_or_default(),
        }
    }
}

/// Result of a successful identity verification.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    /// The token exactly as presented
    pub token: String,
    /// Identity taken from the token claims
    pub identity: UserIdentity,
}

impl std::fmt::Debug for AuthenticatedUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedUser")
            .field("token", &"<redacted>")
            .field("identity", &self.identity)
            .finish()
    }
}
