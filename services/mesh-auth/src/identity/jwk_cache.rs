//! Remote key-set cache.
//!
//! Holds the public keys published by the identity issuer, keyed by `kid`.
//! The cache is an immutable snapshot swapped atomically on refresh, so
//! lookups never block. A missing `kid` triggers a refetch of the whole
//! document, at most once per cooldown interval measured from the last
//! successful fetch. Refreshes are serialized: concurrent misses for the same
//! unknown `kid` cause a single network request.
//!
//! A failed fetch leaves the previous snapshot in place.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey};
use rust_common::{HttpConfig, PlatformError, build_http_client};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::KeyResolutionError;
use crate::metrics::AuthMetrics;
use crate::scheme::{VerificationScheme, parse_asymmetric};
use crate::server::key_store::BASE64URL;

/// Minimum interval between two refreshes caused by unknown key ids.
pub const DEFAULT_KEY_SET_COOLDOWN: Duration = Duration::from_secs(60);

/// 2048 bits.
const MIN_RSA_MODULUS_BYTES: usize = 256;

/// JSON Web Key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type (RSA, EC, OKP, oct); empty when absent
    #[serde(default)]
    pub kty: String,
    /// Key ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Key use (sig, enc)
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    /// Algorithm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// RSA modulus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA exponent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// EC or OKP x coordinate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// EC y coordinate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    /// Curve
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
}

/// JSON Web Key Set document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    /// List of keys
    pub keys: Vec<Jwk>,
}

/// Retrieves the key-set document.
#[async_trait]
pub trait KeySetFetcher: Send + Sync {
    /// Fetches and parses the document at `url`.
    async fn fetch(&self, url: &Url) -> Result<Jwks, KeyResolutionError>;
}

/// Fetches key sets over HTTP.
#[derive(Debug, Clone)]
pub struct HttpKeySetFetcher {
    client: reqwest::Client,
}

impl HttpKeySetFetcher {
    /// Wraps an existing client.
    #[must_use]
    pub const fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Builds a client from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_http_config(config: &HttpConfig) -> Result<Self, PlatformError> {
        Ok(Self::new(build_http_client(config)?))
    }
}

#[async_trait]
impl KeySetFetcher for HttpKeySetFetcher {
    async fn fetch(&self, url: &Url) -> Result<Jwks, KeyResolutionError> {
        let fetch_error = |source: PlatformError| KeyResolutionError::Fetch {
            url: url.to_string(),
            source,
        };

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| fetch_error(e.into()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(PlatformError::status(status.as_u16(), url.as_str())));
        }

        let body = response.bytes().await.map_err(|e| fetch_error(e.into()))?;
        serde_json::from_slice(&body).map_err(|e| KeyResolutionError::MalformedKeySet {
            reason: e.to_string(),
        })
    }
}

/// Immutable view of the key set at one point in time.
#[derive(Debug, Default)]
struct KeySetSnapshot {
    keys: HashMap<String, Arc<VerificationScheme>>,
    fetched_at: Option<Instant>,
}

impl KeySetSnapshot {
    fn from_jwks(jwks: &Jwks) -> Self {
        let mut keys = HashMap::with_capacity(jwks.keys.len());
        for jwk in &jwks.keys {
            let Some(kid) = jwk.kid.as_deref() else {
                warn!(kty = %jwk.kty, "Skipping key without kid");
                continue;
            };
            if let Some(scheme) = jwk_to_scheme(jwk) {
                keys.insert(kid.to_string(), Arc::new(scheme));
            }
        }
        Self {
            keys,
            fetched_at: Some(Instant::now()),
        }
    }

    fn refresh_allowed(&self, cooldown: Duration) -> bool {
        self.fetched_at.is_none_or(|at| at.elapsed() >= cooldown)
    }
}

/// Cache over a remote key-set document.
pub struct RemoteKeySetCache {
    url: Url,
    fetcher: Arc<dyn KeySetFetcher>,
    snapshot: ArcSwap<KeySetSnapshot>,
    refresh_guard: Mutex<()>,
    cooldown: Duration,
    metrics: Option<Arc<AuthMetrics>>,
}

impl RemoteKeySetCache {
    /// Creates an empty cache for the document at `url`.
    ///
    /// Nothing is fetched until the first lookup.
    #[must_use]
    pub fn new(url: Url, fetcher: Arc<dyn KeySetFetcher>) -> Self {
        Self {
            url,
            fetcher,
            snapshot: ArcSwap::from_pointee(KeySetSnapshot::default()),
            refresh_guard: Mutex::new(()),
            cooldown: DEFAULT_KEY_SET_COOLDOWN,
            metrics: None,
        }
    }

    /// Sets the minimum interval between refreshes.
    #[must_use]
    pub const fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Records refresh outcomes.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<AuthMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// URL of the key-set document.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Configured refresh cooldown.
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Number of usable keys currently cached.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.snapshot.load().keys.len()
    }

    /// When the cached snapshot was fetched, if ever.
    #[must_use]
    pub fn last_fetched(&self) -> Option<Instant> {
        self.snapshot.load().fetched_at
    }

    /// Returns the key for `kid`, refreshing the key set if permitted.
    ///
    /// # Errors
    ///
    /// Returns [`KeyResolutionError::KeyNotFound`] if the key is unknown and
    /// a refresh is either suppressed by the cooldown or does not produce it.
    /// Fetch and parse failures are returned as is.
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn get_key(&self, kid: &str) -> Result<Arc<VerificationScheme>, KeyResolutionError> {
        if let Some(key) = self.snapshot.load().keys.get(kid) {
            return Ok(key.clone());
        }

        let _guard = self.refresh_guard.lock().await;

        // A refresh may have completed while waiting for the guard.
        let current = self.snapshot.load_full();
        if let Some(key) = current.keys.get(kid) {
            return Ok(key.clone());
        }

        if !current.refresh_allowed(self.cooldown) {
            debug!("Key set refresh suppressed by cooldown");
            if let Some(metrics) = &self.metrics {
                metrics.key_set_refreshes_suppressed.inc();
            }
            return Err(not_found(kid));
        }

        let refreshed = self.refresh().await?;
        refreshed.keys.get(kid).cloned().ok_or_else(|| not_found(kid))
    }

    async fn refresh(&self) -> Result<Arc<KeySetSnapshot>, KeyResolutionError> {
        info!(url = %self.url, "Fetching key set");
        let result = self.fetcher.fetch(&self.url).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_refresh(result.is_ok());
        }

        let jwks = result.inspect_err(|e| warn!(error = %e, "Key set refresh failed"))?;
        let snapshot = Arc::new(KeySetSnapshot::from_jwks(&jwks));
        self.snapshot.store(snapshot.clone());

        info!(keys = snapshot.keys.len(), "Key set cache updated");
        Ok(snapshot)
    }
}

impl std::fmt::Debug for RemoteKeySetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteKeySetCache")
            .field("url", &self.url.as_str())
            .field("cooldown", &self.cooldown)
            .field("keys", &self.key_count())
            .finish_non_exhaustive()
    }
}

fn not_found(kid: &str) -> KeyResolutionError {
    KeyResolutionError::KeyNotFound {
        kid: kid.to_string(),
    }
}

/// Converts a published key into a verification scheme.
///
/// Keys not meant for signatures, symmetric keys, weak keys and keys whose
/// algorithm cannot be determined are skipped.
fn jwk_to_scheme(jwk: &Jwk) -> Option<VerificationScheme> {
    let kid = jwk.kid.as_deref().unwrap_or_default();

    if jwk.key_use.as_deref().is_some_and(|key_use| key_use != "sig") {
        debug!(kid, key_use = ?jwk.key_use, "Skipping non-signature key");
        return None;
    }

    let algorithm = match jwk.alg.as_deref() {
        Some(name) => {
            let Some(alg) = parse_asymmetric(name) else {
                warn!(kid, alg = name, "Unsupported key algorithm, rejecting");
                return None;
            };
            alg
        }
        None => infer_algorithm(jwk)?,
    };

    let key = match jwk.kty.as_str() {
        "RSA" if is_rsa(algorithm) => {
            let n = jwk.n.as_deref()?;
            let e = jwk.e.as_deref()?;
            if rsa_modulus_len(n) < MIN_RSA_MODULUS_BYTES {
                warn!(kid, "RSA key too small, rejecting");
                return None;
            }
            DecodingKey::from_rsa_components(n, e).ok()?
        }
        "EC" if curve_matches(algorithm, jwk.crv.as_deref()) => {
            let x = jwk.x.as_deref()?;
            let y = jwk.y.as_deref()?;
            DecodingKey::from_ec_components(x, y).ok()?
        }
        "OKP" if algorithm == Algorithm::EdDSA && jwk.crv.as_deref() == Some("Ed25519") => {
            DecodingKey::from_ed_components(jwk.x.as_deref()?).ok()?
        }
        kty => {
            warn!(kid, kty, ?algorithm, "Unsupported key type for algorithm, rejecting");
            return None;
        }
    };

    VerificationScheme::asymmetric(algorithm, key)
}

fn infer_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    match (jwk.kty.as_str(), jwk.crv.as_deref()) {
        ("EC", Some("P-256")) => Some(Algorithm::ES256),
        ("EC", Some("P-384")) => Some(Algorithm::ES384),
        ("RSA", _) => Some(Algorithm::RS256),
        ("OKP", Some("Ed25519")) => Some(Algorithm::EdDSA),
        (kty, crv) => {
            warn!(kty, ?crv, "Cannot infer key algorithm, rejecting");
            None
        }
    }
}

const fn is_rsa(algorithm: Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512
    )
}

fn curve_matches(algorithm: Algorithm, crv: Option<&str>) -> bool {
    matches!(
        (algorithm, crv),
        (Algorithm::ES256, Some("P-256")) | (Algorithm::ES384, Some("P-384"))
    )
}

fn rsa_modulus_len(n: &str) -> usize {
    BASE64URL.decode(n).map_or(0, |bytes| {
        bytes.iter().skip_while(|b| **b == 0).count()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn coordinate(fill: u8) -> String {
        BASE64URL.encode([fill; 32])
    }

    fn ec_key(kid: &str) -> Jwk {
        Jwk {
            kty: "EC".to_string(),
            kid: Some(kid.to_string()),
            key_use: Some("sig".to_string()),
            alg: Some("ES256".to_string()),
            crv: Some("P-256".to_string()),
            x: Some(coordinate(1)),
            y: Some(coordinate(2)),
            ..Jwk::default()
        }
    }

    fn rsa_key(kid: &str, modulus_bytes: usize) -> Jwk {
        let mut modulus = vec![0xc5u8; modulus_bytes];
        modulus[0] = 0xff;
        Jwk {
            kty: "RSA".to_string(),
            kid: Some(kid.to_string()),
            n: Some(BASE64URL.encode(modulus)),
            e: Some("AQAB".to_string()),
            ..Jwk::default()
        }
    }

    struct ScriptedFetcher {
        responses: std::sync::Mutex<Vec<Result<Jwks, KeyResolutionError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn new(mut responses: Vec<Result<Jwks, KeyResolutionError>>) -> Arc<Self> {
            responses.reverse();
            Arc::new(Self {
                responses: std::sync::Mutex::new(responses),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl KeySetFetcher for ScriptedFetcher {
        async fn fetch(&self, _url: &Url) -> Result<Jwks, KeyResolutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(Jwks::default()))
        }
    }

    fn cache(fetcher: Arc<ScriptedFetcher>, cooldown: Duration) -> RemoteKeySetCache {
        RemoteKeySetCache::new(Url::parse("http://issuer.test/jwks.json").unwrap(), fetcher)
            .with_cooldown(cooldown)
    }

    #[test]
    fn test_ec_key_is_accepted() {
        let scheme = jwk_to_scheme(&ec_key("k1")).unwrap();
        assert_eq!(scheme.algorithm(), Algorithm::ES256);
    }

    #[test]
    fn test_algorithm_is_inferred() {
        let mut jwk = ec_key("k1");
        jwk.alg = None;
        assert_eq!(jwk_to_scheme(&jwk).unwrap().algorithm(), Algorithm::ES256);

        let rsa = rsa_key("r1", 256);
        assert_eq!(jwk_to_scheme(&rsa).unwrap().algorithm(), Algorithm::RS256);

        let ed = Jwk {
            kty: "OKP".to_string(),
            kid: Some("e1".to_string()),
            crv: Some("Ed25519".to_string()),
            x: Some(coordinate(3)),
            ..Jwk::default()
        };
        assert_eq!(jwk_to_scheme(&ed).unwrap().algorithm(), Algorithm::EdDSA);
    }

    #[test]
    fn test_encryption_keys_are_skipped() {
        let mut jwk = ec_key("k1");
        jwk.key_use = Some("enc".to_string());
        assert!(jwk_to_scheme(&jwk).is_none());
    }

    #[test]
    fn test_symmetric_keys_are_skipped() {
        let oct = Jwk {
            kty: "oct".to_string(),
            kid: Some("s1".to_string()),
            alg: Some("HS256".to_string()),
            ..Jwk::default()
        };
        assert!(jwk_to_scheme(&oct).is_none());

        let mut disguised = ec_key("k1");
        disguised.alg = Some("HS256".to_string());
        assert!(jwk_to_scheme(&disguised).is_none());
    }

    #[test]
    fn test_weak_keys_are_skipped() {
        assert!(jwk_to_scheme(&rsa_key("r1", 128)).is_none());

        let mut p192 = ec_key("k1");
        p192.alg = None;
        p192.crv = Some("P-192".to_string());
        assert!(jwk_to_scheme(&p192).is_none());
    }

    #[test]
    fn test_curve_must_match_algorithm() {
        let mut jwk = ec_key("k1");
        jwk.alg = Some("ES384".to_string());
        assert!(jwk_to_scheme(&jwk).is_none());
    }

    #[test]
    fn test_snapshot_skips_keys_without_kid() {
        let mut anonymous = ec_key("ignored");
        anonymous.kid = None;
        let snapshot = KeySetSnapshot::from_jwks(&Jwks {
            keys: vec![anonymous, ec_key("k1")],
        });
        assert_eq!(snapshot.keys.len(), 1);
        assert!(snapshot.keys.contains_key("k1"));
    }

    #[tokio::test]
    async fn test_first_lookup_fetches() {
        let fetcher = ScriptedFetcher::new(vec![Ok(Jwks {
            keys: vec![ec_key("k1")],
        })]);
        let cache = cache(fetcher.clone(), DEFAULT_KEY_SET_COOLDOWN);
        assert!(cache.last_fetched().is_none());

        assert!(cache.get_key("k1").await.is_ok());
        assert!(cache.get_key("k1").await.is_ok());
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(cache.key_count(), 1);
        assert!(cache.last_fetched().is_some());
    }

    #[tokio::test]
    async fn test_unknown_kid_is_not_refetched_within_cooldown() {
        let fetcher = ScriptedFetcher::new(vec![Ok(Jwks {
            keys: vec![ec_key("k1")],
        })]);
        let cache = cache(fetcher.clone(), DEFAULT_KEY_SET_COOLDOWN);

        let err = cache.get_key("missing").await.unwrap_err();
        assert!(matches!(err, KeyResolutionError::KeyNotFound { .. }));
        let err = cache.get_key("missing").await.unwrap_err();
        assert!(matches!(err, KeyResolutionError::KeyNotFound { .. }));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_refetch_after_cooldown_picks_up_rotated_key() {
        let fetcher = ScriptedFetcher::new(vec![
            Ok(Jwks {
                keys: vec![ec_key("k1")],
            }),
            Ok(Jwks {
                keys: vec![ec_key("k2")],
            }),
        ]);
        let cache = cache(fetcher.clone(), Duration::from_millis(50));

        assert!(cache.get_key("k1").await.is_ok());
        assert!(cache.get_key("k2").await.is_err());
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(cache.get_key("k2").await.is_ok());
        assert_eq!(fetcher.calls(), 2);
        // The snapshot is replaced wholesale.
        assert_eq!(cache.key_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_snapshot() {
        let fetcher = ScriptedFetcher::new(vec![
            Ok(Jwks {
                keys: vec![ec_key("k1")],
            }),
            Err(KeyResolutionError::MalformedKeySet {
                reason: "expected value".to_string(),
            }),
        ]);
        let cache = cache(fetcher.clone(), Duration::ZERO);

        assert!(cache.get_key("k1").await.is_ok());
        let first_fetch = cache.last_fetched();

        let err = cache.get_key("k2").await.unwrap_err();
        assert!(matches!(err, KeyResolutionError::MalformedKeySet { .. }));
        assert!(cache.get_key("k1").await.is_ok());
        assert_eq!(cache.last_fetched(), first_fetch);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_misses_fetch_once() {
        let fetcher = ScriptedFetcher::new(vec![Ok(Jwks {
            keys: vec![ec_key("k1")],
        })]);
        let cache = Arc::new(cache(fetcher.clone(), DEFAULT_KEY_SET_COOLDOWN));

        let lookups = (0..16).map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_key("unknown").await })
        });
        for lookup in futures::future::join_all(lookups).await {
            assert!(lookup.unwrap().is_err());
        }
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_suppressed_refresh_is_counted() {
        let registry = prometheus::Registry::new();
        let metrics = Arc::new(AuthMetrics::new(&registry).unwrap());
        let fetcher = ScriptedFetcher::new(vec![]);
        let cache = cache(fetcher, DEFAULT_KEY_SET_COOLDOWN).with_metrics(metrics.clone());

        let _ = cache.get_key("a").await;
        let _ = cache.get_key("b").await;

        assert_eq!(metrics.key_set_refreshes_suppressed.get(), 1);
        let fetched = metrics
            .key_set_refreshes
            .with_label_values(&[crate::metrics::outcome::SUCCESS])
            .get();
        assert!((fetched - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_jwks_document_parses_unknown_fields() {
        let jwks: Jwks = serde_json::from_value(serde_json::json!({
            "keys": [{
                "kty": "EC", "kid": "k1", "use": "sig", "alg": "ES256", "crv": "P-256",
                "x": coordinate(1), "y": coordinate(2), "x5c": []
            }]
        }))
        .unwrap();
        assert_eq!(jwks.keys[0].kid.as_deref(), Some("k1"));
    }

    #[test]
    fn test_entry_without_key_type_is_skipped() {
        let jwks: Jwks = serde_json::from_value(serde_json::json!({
            "keys": [
                { "kid": "untyped", "alg": "ES256", "crv": "P-256", "x": coordinate(1), "y": coordinate(2) },
                { "kty": "EC", "kid": "k1", "alg": "ES256", "crv": "P-256", "x": coordinate(1), "y": coordinate(2) }
            ]
        }))
        .unwrap();

        let snapshot = KeySetSnapshot::from_jwks(&jwks);
        assert_eq!(snapshot.keys.len(), 1);
        assert!(snapshot.keys.contains_key("k1"));
    }
}
