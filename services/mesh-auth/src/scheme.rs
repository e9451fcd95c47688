//! Algorithm-pinned verification keys.
//!
//! Every key that can verify a token is wrapped in a [`VerificationScheme`]
//! that carries exactly one permitted algorithm. Verification always runs
//! with that algorithm alone, whatever the token header claims, so a token
//! can never be accepted under an algorithm other than the one the key was
//! published or configured for.

use jsonwebtoken::{Algorithm, DecodingKey, TokenData, Validation, decode};
use serde::de::DeserializeOwned;

/// A verification key bound to the single algorithm it may be used with.
#[derive(Clone)]
pub enum VerificationScheme {
    /// Shared-secret HMAC, always HS256
    Symmetric {
        /// HMAC secret
        key: DecodingKey,
    },
    /// Public key published by a remote authority
    Asymmetric {
        /// The only algorithm this key verifies
        algorithm: Algorithm,
        /// Public key material
        key: DecodingKey,
    },
}

impl VerificationScheme {
    /// HS256 scheme over a shared secret.
    #[must_use]
    pub fn symmetric(secret: &[u8]) -> Self {
        Self::Symmetric {
            key: DecodingKey::from_secret(secret),
        }
    }

    /// Asymmetric scheme. Returns `None` for HMAC algorithms.
    #[must_use]
    pub fn asymmetric(algorithm: Algorithm, key: DecodingKey) -> Option<Self> {
        is_asymmetric(algorithm).then_some(Self::Asymmetric { algorithm, key })
    }

    /// The single algorithm this scheme accepts.
    #[must_use]
    pub const fn algorithm(&self) -> Algorithm {
        match self {
            Self::Symmetric { .. } => Algorithm::HS256,
            Self::Asymmetric { algorithm, .. } => *algorithm,
        }
    }

    /// Verifies `token` and decodes its claims.
    ///
    /// The allowed algorithms of `validation` are replaced by this scheme's
    /// algorithm before decoding.
    ///
    /// # Errors
    ///
    /// Returns the `jsonwebtoken` error for bad signatures, algorithm
    /// mismatches, malformed tokens or failed claim checks.
    pub fn verify<T: DeserializeOwned>(
        &self,
        token: &str,
        mut validation: Validation,
    ) -> Result<TokenData<T>, jsonwebtoken::errors::Error> {
        validation.algorithms = vec![self.algorithm()];
        let key = match self {
            Self::Symmetric { key } | Self::Asymmetric { key, .. } => key,
        };
        decode::<T>(token, key, &validation)
    }
}

impl std::fmt::Debug for VerificationScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Symmetric { .. } => f.write_str("Symmetric(HS256)"),
            Self::Asymmetric { algorithm, .. } => write!(f, "Asymmetric({algorithm:?})"),
        }
    }
}

/// True for signature algorithms backed by a public/private key pair.
#[must_use]
pub const fn is_asymmetric(algorithm: Algorithm) -> bool {
    !matches!(
        algorithm,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
    )
}

/// Parses an algorithm name, accepting only asymmetric algorithms.
#[must_use]
pub fn parse_asymmetric(name: &str) -> Option<Algorithm> {
    name.parse::<Algorithm>().ok().filter(|alg| is_asymmetric(*alg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Subject {
        sub: String,
    }

    fn lenient() -> Validation {
        let mut validation = Validation::default();
        validation.required_spec_claims.clear();
        validation.validate_aud = false;
        validation
    }

    #[test]
    fn test_symmetric_scheme_is_hs256() {
        let scheme = VerificationScheme::symmetric(b"shared-secret");
        assert_eq!(scheme.algorithm(), Algorithm::HS256);
    }

    #[test]
    fn test_asymmetric_rejects_hmac() {
        let key = DecodingKey::from_secret(b"k");
        assert!(VerificationScheme::asymmetric(Algorithm::HS256, key.clone()).is_none());
        assert!(VerificationScheme::asymmetric(Algorithm::HS512, key.clone()).is_none());
        assert!(VerificationScheme::asymmetric(Algorithm::ES256, key).is_some());
    }

    #[test]
    fn test_verify_pins_algorithm() {
        let claims = Subject { sub: "svc".to_string() };
        let token = encode(
            &Header::new(Algorithm::HS384),
            &claims,
            &EncodingKey::from_secret(b"shared-secret"),
        )
        .unwrap();

        let scheme = VerificationScheme::symmetric(b"shared-secret");
        let mut validation = lenient();
        validation.algorithms = vec![Algorithm::HS384];

        let err = scheme.verify::<Subject>(&token, validation).unwrap_err();
        assert_eq!(*err.kind(), jsonwebtoken::errors::ErrorKind::InvalidAlgorithm);
    }

    #[test]
    fn test_verify_accepts_matching_token() {
        let token = encode(
            &Header::new(Algorithm::HS256),
            &Subject { sub: "svc".to_string() },
            &EncodingKey::from_secret(b"shared-secret"),
        )
        .unwrap();

        let scheme = VerificationScheme::symmetric(b"shared-secret");
        let data = scheme.verify::<Subject>(&token, lenient()).unwrap();
        assert_eq!(data.claims.sub, "svc");
    }

    #[test]
    fn test_parse_asymmetric() {
        assert_eq!(parse_asymmetric("ES256"), Some(Algorithm::ES256));
        assert_eq!(parse_asymmetric("RS512"), Some(Algorithm::RS512));
        assert_eq!(parse_asymmetric("EdDSA"), Some(Algorithm::EdDSA));
        assert_eq!(parse_asymmetric("HS256"), None);
        assert_eq!(parse_asymmetric("none"), None);
        assert_eq!(parse_asymmetric("es256"), None);
    }

    #[test]
    fn test_debug_never_prints_key_material() {
        let scheme = VerificationScheme::symmetric(b"super-secret-bytes");
        assert_eq!(format!("{scheme:?}"), "Symmetric(HS256)");
    }
}
