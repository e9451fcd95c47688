//! Test fixtures: signing authorities and sample secrets.
//!
//! [`TestAuthority`] plays the part of the auth plugin. It holds ES256 key
//! pairs, renders them as a JWKS document and mints identity tokens.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use ring::rand::SystemRandom;
use ring::signature::{ECDSA_P256_SHA256_FIXED_SIGNING, EcdsaKeyPair, KeyPair};
use serde_json::{Value, json};

/// Issuer used by [`TestAuthority::new`].
pub const TEST_ISSUER: &str = "http://localhost:7007/api/auth";

/// Audience used by [`TestAuthority::new`].
pub const TEST_AUDIENCE: &str = "mesh";

/// Lifetime of minted tokens in seconds.
pub const TOKEN_LIFETIME_SECS: i64 = 3600;

/// Current Unix time in seconds.
#[must_use]
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// An ES256 key pair with a key id.
pub struct TestSigningKey {
    kid: String,
    encoding_key: EncodingKey,
    public_key: Vec<u8>,
}

impl TestSigningKey {
    /// Generates a fresh P-256 key pair.
    ///
    /// # Panics
    ///
    /// Panics if the system RNG fails.
    #[must_use]
    pub fn generate(kid: impl Into<String>) -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .expect("P-256 key generation");
        let pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
            .expect("generated PKCS#8 parses");

        Self {
            kid: kid.into(),
            encoding_key: EncodingKey::from_ec_der(pkcs8.as_ref()),
            public_key: pair.public_key().as_ref().to_vec(),
        }
    }

    /// Key id.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Uncompressed SEC1 public key (`0x04 || x || y`).
    #[must_use]
    pub fn public_key_bytes(&self) -> &[u8] {
        &self.public_key
    }

    /// Public key as a JWK.
    #[must_use]
    pub fn jwk(&self) -> Value {
        json!({
            "kty": "EC",
            "crv": "P-256",
            "use": "sig",
            "alg": "ES256",
            "kid": self.kid,
            "x": URL_SAFE_NO_PAD.encode(&self.public_key[1..33]),
            "y": URL_SAFE_NO_PAD.encode(&self.public_key[33..65]),
        })
    }

    /// Signs `claims` as an ES256 token carrying this key's id.
    #[must_use]
    pub fn sign(&self, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.kid.clone());
        self.sign_with_header(&header, claims)
    }

    /// Signs `claims` under an arbitrary header.
    ///
    /// # Panics
    ///
    /// Panics if the header algorithm does not fit an EC key.
    #[must_use]
    pub fn sign_with_header(&self, header: &Header, claims: &Value) -> String {
        encode(header, claims, &self.encoding_key).expect("ES256 signing")
    }
}

impl std::fmt::Debug for TestSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestSigningKey")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

/// Stand-in for the identity issuer.
#[derive(Debug)]
pub struct TestAuthority {
    issuer: String,
    audience: String,
    keys: Vec<TestSigningKey>,
}

impl Default for TestAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl TestAuthority {
    /// Authority with a single key, `key-1`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            issuer: TEST_ISSUER.to_string(),
            audience: TEST_AUDIENCE.to_string(),
            keys: vec![TestSigningKey::generate("key-1")],
        }
    }

    /// Overrides the issuer placed in minted tokens.
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    /// Issuer placed in minted tokens.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Audience placed in minted tokens.
    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Adds a key which becomes the signing key.
    pub fn rotate(&mut self, kid: impl Into<String>) -> &TestSigningKey {
        self.keys.push(TestSigningKey::generate(kid));
        self.signing_key()
    }

    /// Drops every key except the signing key.
    pub fn retire_old_keys(&mut self) {
        let keep = self.keys.len().saturating_sub(1);
        self.keys.drain(..keep);
    }

    /// Key used by [`TestAuthority::mint`].
    ///
    /// # Panics
    ///
    /// Never; an authority always holds a key.
    #[must_use]
    pub fn signing_key(&self) -> &TestSigningKey {
        self.keys.last().expect("authority has a key")
    }

    /// Published key set.
    #[must_use]
    pub fn jwks(&self) -> Value {
        json!({ "keys": self.keys.iter().map(TestSigningKey::jwk).collect::<Vec<_>>() })
    }

    /// Valid claims for `sub`, issued now.
    #[must_use]
    pub fn claims(&self, sub: &str) -> Value {
        let now = unix_now();
        json!({
            "iss": self.issuer,
            "aud": self.audience,
            "sub": sub,
            "iat": now,
            "exp": now + TOKEN_LIFETIME_SECS,
        })
    }

    /// Mints a valid token for `sub`.
    #[must_use]
    pub fn mint(&self, sub: &str) -> String {
        self.mint_claims(&self.claims(sub))
    }

    /// Mints a token for arbitrary claims.
    #[must_use]
    pub fn mint_claims(&self, claims: &Value) -> String {
        self.signing_key().sign(claims)
    }
}

/// Merges `overrides` into `claims`; a `null` override removes the claim.
#[must_use]
pub fn with_claims(mut claims: Value, overrides: &Value) -> Value {
    if let (Some(target), Some(source)) = (claims.as_object_mut(), overrides.as_object()) {
        for (name, value) in source {
            if value.is_null() {
                target.remove(name);
            } else {
                target.insert(name.clone(), value.clone());
            }
        }
    }
    claims
}

/// An unsecured token (`"alg": "none"`) with an empty signature.
#[must_use]
pub fn unsigned_token(kid: &str, claims: &Value) -> String {
    let header = json!({ "alg": "none", "typ": "JWT", "kid": kid });
    format!(
        "{}.{}.",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

/// An HS256 token signed with `secret` and carrying `kid`.
///
/// # Panics
///
/// Panics if HMAC signing fails.
#[must_use]
pub fn hs256_token(secret: &[u8], kid: Option<&str>, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = kid.map(str::to_string);
    encode(&header, claims, &EncodingKey::from_secret(secret)).expect("HS256 signing")
}

/// Base64url server secrets, primary first.
#[must_use]
pub fn sample_secrets(count: usize) -> Vec<String> {
    (1..=count)
        .map(|i| URL_SAFE_NO_PAD.encode(format!("mesh-test-secret-{i:02}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jwk_coordinates_are_32_bytes() {
        let key = TestSigningKey::generate("k");
        let jwk = key.jwk();
        for coordinate in ["x", "y"] {
            let encoded = jwk[coordinate].as_str().unwrap();
            assert_eq!(URL_SAFE_NO_PAD.decode(encoded).unwrap().len(), 32);
        }
        assert_eq!(key.public_key_bytes()[0], 0x04);
    }

    #[test]
    fn test_rotation_changes_signing_key() {
        let mut authority = TestAuthority::new();
        authority.rotate("key-2");
        assert_eq!(authority.signing_key().kid(), "key-2");
        assert_eq!(authority.jwks()["keys"].as_array().unwrap().len(), 2);

        authority.retire_old_keys();
        assert_eq!(authority.jwks()["keys"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_with_claims_overrides_and_removes() {
        let claims = json!({ "sub": "a", "iat": 1 });
        let merged = with_claims(claims, &json!({ "sub": "b", "iat": null }));
        assert_eq!(merged, json!({ "sub": "b" }));
    }

    #[test]
    fn test_sample_secrets_are_distinct() {
        let secrets = sample_secrets(3);
        assert_eq!(secrets.len(), 3);
        assert_ne!(secrets[0], secrets[1]);
    }
}
