//! Ordered store of shared verification secrets.
//!
//! The store is read-only once populated. In non-production mode it may start
//! empty; the first signing request then generates a key inside a
//! one-time-initialization cell, so concurrent first calls all observe the
//! same single key (Uninitialized → Initializing → Ready).

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use jsonwebtoken::EncodingKey;
use once_cell::sync::OnceCell;
use ring::rand::{SecureRandom, SystemRandom};
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::config::Environment;
use crate::error::AuthError;
use crate::scheme::VerificationScheme;

/// Size of generated HMAC-SHA256 keys in bytes.
pub const GENERATED_KEY_LEN: usize = 32;

/// Base64url with optional padding.
pub(crate) const BASE64URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A shared HS256 secret.
pub struct VerificationKey {
    secret: Zeroizing<Vec<u8>>,
    scheme: VerificationScheme,
}

impl VerificationKey {
    /// Wraps raw secret bytes.
    #[must_use]
    pub fn from_bytes(secret: Vec<u8>) -> Self {
        let scheme = VerificationScheme::symmetric(&secret);
        Self {
            secret: Zeroizing::new(secret),
            scheme,
        }
    }

    /// Decodes a base64url secret (padding optional).
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the text is not base64url or
    /// decodes to nothing.
    pub fn from_base64url(encoded: &str) -> Result<Self, AuthError> {
        decode_secret(encoded)
            .map(Self::from_bytes)
            .map_err(AuthError::configuration)
    }

    /// Generates a fresh 256-bit secret.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the system RNG fails.
    pub fn generate() -> Result<Self, AuthError> {
        let mut secret = vec![0u8; GENERATED_KEY_LEN];
        SystemRandom::new()
            .fill(&mut secret)
            .map_err(|_| AuthError::Internal(anyhow::anyhow!("system RNG unavailable")))?;
        Ok(Self::from_bytes(secret))
    }

    /// Base64url text of the secret, as accepted by [`Self::from_base64url`].
    #[must_use]
    pub fn to_base64url(&self) -> String {
        BASE64URL.encode(self.secret.as_slice())
    }

    /// Raw secret bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.secret
    }

    /// HS256 verification scheme for this key.
    #[must_use]
    pub const fn scheme(&self) -> &VerificationScheme {
        &self.scheme
    }

    pub(crate) fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_secret(&self.secret)
    }
}

impl PartialEq for VerificationKey {
    fn eq(&self, other: &Self) -> bool {
        self.secret.as_slice().ct_eq(other.secret.as_slice()).into()
    }
}

impl Eq for VerificationKey {}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationKey")
            .field("len", &self.secret.len())
            .finish_non_exhaustive()
    }
}

fn decode_secret(encoded: &str) -> Result<Vec<u8>, String> {
    let secret = BASE64URL
        .decode(encoded.trim())
        .map_err(|e| format!("not valid base64url: {e}"))?;
    if secret.is_empty() {
        return Err("decodes to an empty secret".to_string());
    }
    Ok(secret)
}

/// Non-empty ordered key list. The first key signs.
#[derive(Debug)]
pub struct KeyRing {
    keys: Vec<VerificationKey>,
}

impl KeyRing {
    fn new(keys: Vec<VerificationKey>) -> Option<Self> {
        (!keys.is_empty()).then_some(Self { keys })
    }

    /// The signing key.
    #[must_use]
    pub fn signing_key(&self) -> &VerificationKey {
        &self.keys[0]
    }

    /// All keys in rotation order.
    #[must_use]
    pub fn keys(&self) -> &[VerificationKey] {
        &self.keys
    }
}

/// Shared-secret key store.
#[derive(Debug)]
pub struct KeyStore {
    ring: OnceCell<KeyRing>,
    environment: Environment,
}

impl KeyStore {
    /// Builds a store from base64url secrets, keeping their order.
    ///
    /// An empty list is a configuration error in production. Elsewhere the
    /// store starts empty and a key is generated on first signing.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] for an undecodable secret, or for
    /// an empty list in production.
    pub fn from_secrets(secrets: &[String], environment: Environment) -> Result<Self, AuthError> {
        let mut keys: Vec<VerificationKey> = Vec::with_capacity(secrets.len());
        for (index, secret) in secrets.iter().enumerate() {
            let key = decode_secret(secret)
                .map(VerificationKey::from_bytes)
                .map_err(|reason| {
                    AuthError::configuration(format!("backend.auth.keys[{index}]: {reason}"))
                })?;
            if keys.contains(&key) {
                warn!(index, "Duplicate server secret configured");
            }
            keys.push(key);
        }

        let ring = match KeyRing::new(keys) {
            Some(populated) => {
                info!(keys = populated.keys().len(), "Server token keys loaded");
                OnceCell::with_value(populated)
            }
            None if environment.is_production() => {
                return Err(AuthError::configuration(
                    "no server secrets configured under backend.auth.keys; at least one is required in production",
                ));
            }
            None => {
                warn!(
                    "NO SERVER SECRETS CONFIGURED: generating an ephemeral key on first use. \
                     Tokens will not be accepted by other instances. Configure backend.auth.keys."
                );
                OnceCell::new()
            }
        };

        Ok(Self { ring, environment })
    }

    /// Returns the signing key, generating one on first use if permitted.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store is empty and generation is not
    /// permitted, or if key generation fails.
    pub fn signing_key(&self) -> Result<&VerificationKey, AuthError> {
        let ring = self.ring.get_or_try_init(|| {
            if self.environment.is_production() {
                return Err(AuthError::Internal(anyhow::anyhow!(
                    "server key store is empty in production"
                )));
            }
            let key = VerificationKey::generate()?;
            warn!("Generated ephemeral server token key");
            KeyRing::new(vec![key])
                .ok_or_else(|| AuthError::Internal(anyhow::anyhow!("generated key ring is empty")))
        })?;
        Ok(ring.signing_key())
    }

    /// Verification keys in rotation order; empty before first generation.
    #[must_use]
    pub fn verification_keys(&self) -> &[VerificationKey] {
        self.ring.get().map_or(&[][..], KeyRing::keys)
    }

    /// Number of keys currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.verification_keys().len()
    }

    /// True while no key has been configured or generated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.get().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| BASE64URL.encode(v)).collect()
    }

    #[test]
    fn test_first_secret_signs() {
        let store =
            KeyStore::from_secrets(&secrets(&["primary", "secondary"]), Environment::Production)
                .unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.signing_key().unwrap().as_bytes(), b"primary");
        assert_eq!(store.verification_keys()[1].as_bytes(), b"secondary");
    }

    #[test]
    fn test_configured_store_is_ready_without_generation() {
        let store =
            KeyStore::from_secrets(&secrets(&["configured"]), Environment::Development).unwrap();

        assert!(!store.is_empty());
        assert_eq!(store.signing_key().unwrap().as_bytes(), b"configured");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_empty_production_store_is_rejected() {
        let err = KeyStore::from_secrets(&[], Environment::Production).unwrap_err();
        assert!(matches!(err, AuthError::Configuration { .. }));
    }

    #[test]
    fn test_empty_development_store_generates_once() {
        let store = KeyStore::from_secrets(&[], Environment::Development).unwrap();
        assert!(store.is_empty());

        let first = store.signing_key().unwrap().as_bytes().to_vec();
        let second = store.signing_key().unwrap().as_bytes().to_vec();

        assert_eq!(first.len(), GENERATED_KEY_LEN);
        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_concurrent_first_use_generates_single_key() {
        let store = std::sync::Arc::new(KeyStore::from_secrets(&[], Environment::Development).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.signing_key().unwrap().to_base64url())
            })
            .collect();
        let generated: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(generated.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_invalid_secret_names_index() {
        let input = vec![BASE64URL.encode("ok"), "not base64 !!".to_string()];
        let err = KeyStore::from_secrets(&input, Environment::Development).unwrap_err();
        assert!(err.to_string().contains("backend.auth.keys[1]"));
    }

    #[test]
    fn test_padding_is_optional() {
        let padded = VerificationKey::from_base64url("c2VjcmV0LTE=").unwrap();
        let unpadded = VerificationKey::from_base64url("c2VjcmV0LTE").unwrap();
        assert_eq!(padded, unpadded);
        assert_eq!(padded.as_bytes(), b"secret-1");
    }

    #[test]
    fn test_empty_secret_is_rejected() {
        assert!(VerificationKey::from_base64url("").is_err());
    }

    #[test]
    fn test_generated_key_round_trips_through_text() {
        let key = VerificationKey::generate().unwrap();
        let parsed = VerificationKey::from_base64url(&key.to_base64url()).unwrap();
        assert_eq!(key, parsed);
    }

    #[test]
    fn test_debug_hides_secret() {
        let key = VerificationKey::from_bytes(b"hunter2".to_vec());
        let rendered = format!("{key:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("len"));
    }
}
