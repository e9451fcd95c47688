//! Prometheus metrics for token issuance, verification and key-set refreshes.

use prometheus::{CounterVec, IntCounter, Opts, Registry};

const NAMESPACE: &str = "mesh_auth";

/// Outcome label values.
pub mod outcome {
    /// Operation succeeded
    pub const SUCCESS: &str = "success";
    /// Operation was rejected or failed
    pub const FAILURE: &str = "failure";
}

/// Metrics shared by the server token manager and the identity verifier.
#[derive(Clone)]
pub struct AuthMetrics {
    /// Server tokens issued
    pub server_tokens_issued: IntCounter,
    /// Server token verifications by outcome
    pub server_token_verifications: CounterVec,
    /// User identity verifications by outcome
    pub identity_verifications: CounterVec,
    /// Key-set refreshes by outcome
    pub key_set_refreshes: CounterVec,
    /// Refreshes skipped because the cooldown had not elapsed
    pub key_set_refreshes_suppressed: IntCounter,
}

impl AuthMetrics {
    /// Creates and registers the metrics.
    ///
    /// # Errors
    ///
    /// Returns an error if a metric with the same name is already registered.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let server_tokens_issued = IntCounter::with_opts(
            Opts::new("server_tokens_issued_total", "Total server tokens issued")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(server_tokens_issued.clone()))?;

        let server_token_verifications = CounterVec::new(
            Opts::new(
                "server_token_verifications_total",
                "Total server token verifications",
            )
            .namespace(NAMESPACE),
            &["outcome"],
        )?;
        registry.register(Box::new(server_token_verifications.clone()))?;

        let identity_verifications = CounterVec::new(
            Opts::new(
                "identity_verifications_total",
                "Total user identity token verifications",
            )
            .namespace(NAMESPACE),
            &["outcome"],
        )?;
        registry.register(Box::new(identity_verifications.clone()))?;

        let key_set_refreshes = CounterVec::new(
            Opts::new("key_set_refreshes_total", "Total remote key set fetches")
                .namespace(NAMESPACE),
            &["outcome"],
        )?;
        registry.register(Box::new(key_set_refreshes.clone()))?;

        let key_set_refreshes_suppressed = IntCounter::with_opts(
            Opts::new(
                "key_set_refreshes_suppressed_total",
                "Key set refreshes skipped during cooldown",
            )
            .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(key_set_refreshes_suppressed.clone()))?;

        Ok(Self {
            server_tokens_issued,
            server_token_verifications,
            identity_verifications,
            key_set_refreshes,
            key_set_refreshes_suppressed,
        })
    }

    /// Records a server token verification
    pub fn record_server_verification(&self, success: bool) {
        self.server_token_verifications
            .with_label_values(&[label(success)])
            .inc();
    }

    /// Records a user identity verification
    pub fn record_identity_verification(&self, success: bool) {
        self.identity_verifications
            .with_label_values(&[label(success)])
            .inc();
    }

    /// Records a key set fetch
    pub fn record_refresh(&self, success: bool) {
        self.key_set_refreshes.with_label_values(&[label(success)]).inc();
    }
}

impl std::fmt::Debug for AuthMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthMetrics").finish_non_exhaustive()
    }
}

const fn label(success: bool) -> &'static str {
    if success {
        outcome::SUCCESS
    } else {
        outcome::FAILURE
    }
}
