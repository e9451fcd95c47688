//! User identity token verification.
//!
//! Validation order:
//! 1. Token present
//! 2. Header decodes and names an allowed algorithm and a `kid`
//! 3. Key resolved from the remote key set
//! 4. Key algorithm matches the header
//! 5. Signature, `iss`, `aud`, `exp`, `iat` and `sub` checks

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, Validation, decode_header};
use rust_common::HttpConfig;
use tracing::{debug, instrument};
use url::Url;

use crate::config::Config;
use crate::error::AuthError;
use crate::identity::claims::{AuthenticatedUser, IdentityClaims};
use crate::identity::discovery::{Discovery, append_path};
use crate::identity::jwk_cache::{
    DEFAULT_KEY_SET_COOLDOWN, HttpKeySetFetcher, KeySetFetcher, RemoteKeySetCache,
};
use crate::metrics::AuthMetrics;
use crate::scheme::{is_asymmetric, parse_asymmetric};

/// Audience every identity token must carry.
pub const PLATFORM_AUDIENCE: &str = "mesh";

/// Tolerated difference between our clock and the issuer's.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(10);

/// Largest clock skew accepted from configuration.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Plugin that publishes the identity key set.
pub const AUTH_PLUGIN_ID: &str = "auth";

const KEY_SET_PATH: [&str; 2] = [".well-known", "jwks.json"];

/// Options for [`IdentityTokenVerifier`].
#[derive(Debug, Clone)]
pub struct IdentityVerifierOptions {
    /// Required `iss`
    pub issuer: String,
    /// Required `aud` entry
    pub audience: String,
    /// Asymmetric algorithms accepted
    pub algorithms: Vec<Algorithm>,
    /// Leeway applied to `exp` and `iat`
    pub clock_skew: Duration,
    /// Minimum time between key-set refreshes
    pub key_set_cooldown: Duration,
}

impl IdentityVerifierOptions {
    /// Defaults for tokens issued by `issuer`.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: PLATFORM_AUDIENCE.to_string(),
            algorithms: vec![Algorithm::ES256],
            clock_skew: DEFAULT_CLOCK_SKEW,
            key_set_cooldown: DEFAULT_KEY_SET_COOLDOWN,
        }
    }

    /// Options from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] for an unknown or symmetric
    /// algorithm name, or for options that fail validation.
    pub fn from_config(config: &Config) -> Result<Self, AuthError> {
        let algorithms = config
            .identity_algorithms
            .iter()
            .map(|name| {
                parse_asymmetric(name.trim()).ok_or_else(|| {
                    AuthError::configuration(format!(
                        "identity algorithm {name} is not a supported asymmetric algorithm"
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let options = Self {
            issuer: config.auth_issuer.clone(),
            audience: config.identity_audience.clone(),
            algorithms,
            clock_skew: config.clock_skew(),
            key_set_cooldown: config.key_set_cooldown(),
        };
        options.validate()?;
        Ok(options)
    }

    /// Sets the required audience.
    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = audience.into();
        self
    }

    /// Sets the accepted algorithms.
    #[must_use]
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.algorithms = algorithms;
        self
    }

    /// Sets the clock skew leeway.
    #[must_use]
    pub const fn with_clock_skew(mut self, clock_skew: Duration) -> Self {
        self.clock_skew = clock_skew;
        self
    }

    /// Sets the key-set refresh cooldown.
    #[must_use]
    pub const fn with_key_set_cooldown(mut self, cooldown: Duration) -> Self {
        self.key_set_cooldown = cooldown;
        self
    }

    fn validate(&self) -> Result<(), AuthError> {
        if self.issuer.trim().is_empty() {
            return Err(AuthError::configuration("identity issuer must not be empty"));
        }
        if self.audience.trim().is_empty() {
            return Err(AuthError::configuration("identity audience must not be empty"));
        }
        if self.algorithms.is_empty() {
            return Err(AuthError::configuration(
                "at least one identity algorithm is required",
            ));
        }
        if let Some(alg) = self.algorithms.iter().find(|alg| !is_asymmetric(**alg)) {
            return Err(AuthError::configuration(format!(
                "symmetric algorithm {alg:?} cannot verify identity tokens"
            )));
        }
        if self.key_set_cooldown.is_zero() {
            return Err(AuthError::configuration(
                "key set cooldown must be greater than zero",
            ));
        }
        if self.clock_skew > MAX_CLOCK_SKEW {
            return Err(AuthError::configuration(format!(
                "clock skew must not exceed {}s",
                MAX_CLOCK_SKEW.as_secs()
            )));
        }
        Ok(())
    }
}

/// Verifies user identity tokens against the issuer's published keys.
#[derive(Debug)]
pub struct IdentityTokenVerifier {
    options: IdentityVerifierOptions,
    key_set: RemoteKeySetCache,
    metrics: Option<Arc<AuthMetrics>>,
}

impl IdentityTokenVerifier {
    /// Creates a verifier that fetches keys over HTTP.
    ///
    /// The key-set location is resolved once, here.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] for invalid options, or if
    /// discovery or the HTTP client cannot be set up.
    pub async fn create(
        discovery: &dyn Discovery,
        options: IdentityVerifierOptions,
    ) -> Result<Self, AuthError> {
        let fetcher = HttpKeySetFetcher::from_http_config(&HttpConfig::default()).map_err(|e| {
            AuthError::configuration(format!("cannot build key set HTTP client: {e}"))
        })?;
        Self::with_fetcher(discovery, options, Arc::new(fetcher)).await
    }

    /// Creates a verifier with a custom key-set fetcher.
    ///
    /// # Errors
    ///
    /// See [`IdentityTokenVerifier::create`].
    pub async fn with_fetcher(
        discovery: &dyn Discovery,
        options: IdentityVerifierOptions,
        fetcher: Arc<dyn KeySetFetcher>,
    ) -> Result<Self, AuthError> {
        options.validate()?;

        let base = discovery
            .base_url(AUTH_PLUGIN_ID)
            .await
            .map_err(|e| AuthError::configuration(e.to_string()))?;
        let url = key_set_url(&base)?;
        debug!(url = %url, "Resolved identity key set location");

        let key_set = RemoteKeySetCache::new(url, fetcher).with_cooldown(options.key_set_cooldown);
        Ok(Self {
            options,
            key_set,
            metrics: None,
        })
    }

    /// Records verification and refresh outcomes.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<AuthMetrics>) -> Self {
        self.key_set = self.key_set.with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    /// The underlying key-set cache.
    #[must_use]
    pub const fn key_set(&self) -> &RemoteKeySetCache {
        &self.key_set
    }

    /// Options in effect.
    #[must_use]
    pub const fn options(&self) -> &IdentityVerifierOptions {
        &self.options
    }

    /// Verifies `token` and returns the identity it carries.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Authentication`] for any rejected token,
    /// including when its key cannot be resolved.
    #[instrument(skip_all)]
    pub async fn authenticate(&self, token: Option<&str>) -> Result<AuthenticatedUser, AuthError> {
        let result = self.verify(token).await;
        match &result {
            Ok(user) => debug!(user = %user.identity.user_entity_ref, "Identity token accepted"),
            Err(e) => debug!(error = %e, "Identity token rejected"),
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_identity_verification(result.is_ok());
        }
        result
    }

    /// Verifies the bearer token of an `Authorization` header value.
    ///
    /// # Errors
    ///
    /// As [`IdentityTokenVerifier::authenticate`]; a missing header or a
    /// non-bearer scheme counts as a missing token.
    pub async fn authenticate_header(
        &self,
        authorization: Option<&str>,
    ) -> Result<AuthenticatedUser, AuthError> {
        self.authenticate(authorization.and_then(bearer_token)).await
    }

    async fn verify(&self, token: Option<&str>) -> Result<AuthenticatedUser, AuthError> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::authentication("no token specified"))?;

        let header = decode_header(token)
            .map_err(|e| AuthError::authentication_with("malformed token header", e))?;
        if !self.options.algorithms.contains(&header.alg) {
            return Err(AuthError::authentication(format!(
                "token algorithm {:?} is not allowed",
                header.alg
            )));
        }
        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| AuthError::authentication("token header has no key id"))?;

        let scheme = self.key_set.get_key(kid).await?;
        if scheme.algorithm() != header.alg {
            return Err(AuthError::authentication(
                "token algorithm does not match its key",
            ));
        }

        let claims = scheme
            .verify::<IdentityClaims>(token, self.validation())
            .map_err(|e| AuthError::authentication_with("invalid identity token", e))?
            .claims;

        self.check_issued_at(&claims)?;
        if claims.sub.trim().is_empty() {
            return Err(AuthError::authentication("no user sub found in token"));
        }

        Ok(AuthenticatedUser {
            token: token.to_string(),
            identity: claims.into(),
        })
    }

    fn validation(&self) -> Validation {
        // Algorithms are pinned by the key's scheme.
        let mut validation = Validation::new(Algorithm::ES256);
        validation.set_issuer(&[&self.options.issuer]);
        validation.set_audience(&[&self.options.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.leeway = self.options.clock_skew.as_secs();
        validation
    }

    fn check_issued_at(&self, claims: &IdentityClaims) -> Result<(), AuthError> {
        let Some(iat) = claims.iat else {
            return Ok(());
        };
        let latest = chrono::Utc::now()
            .timestamp()
            .saturating_add(skew_secs(self.options.clock_skew));
        if iat > latest {
            return Err(AuthError::authentication("token issued in the future"));
        }
        Ok(())
    }
}

/// Location of the key-set document under the auth plugin base URL.
fn key_set_url(base: &Url) -> Result<Url, AuthError> {
    append_path(base, &KEY_SET_PATH).map_err(AuthError::configuration)
}

fn skew_secs(skew: Duration) -> i64 {
    i64::try_from(skew.as_secs()).unwrap_or(i64::MAX)
}

/// Extracts the token from an `Authorization: Bearer <token>` value.
#[must_use]
pub fn bearer_token(authorization: &str) -> Option<&str> {
    let (scheme, token) = authorization.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
