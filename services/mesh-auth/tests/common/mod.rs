//! Shared helpers for mesh-auth integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mesh_auth::error::KeyResolutionError;
use mesh_auth::identity::{Discovery, Jwks, KeySetFetcher};
use mesh_auth::{IdentityTokenVerifier, IdentityVerifierOptions};
use serde_json::Value;
use test_utils::TestAuthority;
use url::Url;

/// Discovery returning a fixed auth plugin location.
pub struct StaticDiscovery(pub Url);

impl StaticDiscovery {
    pub fn new() -> Self {
        Self(Url::parse("http://issuer.test/api/auth").unwrap())
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn base_url(&self, _plugin_id: &str) -> Result<Url, KeyResolutionError> {
        Ok(self.0.clone())
    }
}

/// Discovery that always fails.
pub struct FailingDiscovery;

#[async_trait]
impl Discovery for FailingDiscovery {
    async fn base_url(&self, plugin_id: &str) -> Result<Url, KeyResolutionError> {
        Err(KeyResolutionError::Discovery {
            plugin_id: plugin_id.to_string(),
            reason: "no such plugin".to_string(),
        })
    }
}

/// Serves a replaceable JWKS document and counts fetches.
pub struct CountingFetcher {
    document: Mutex<Value>,
    calls: AtomicUsize,
}

impl CountingFetcher {
    pub fn new(document: Value) -> Arc<Self> {
        Arc::new(Self {
            document: Mutex::new(document),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn publish(&self, document: Value) {
        *self.document.lock().unwrap() = document;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySetFetcher for CountingFetcher {
    async fn fetch(&self, _url: &Url) -> Result<Jwks, KeyResolutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let document = self.document.lock().unwrap().clone();
        serde_json::from_value(document).map_err(|e| KeyResolutionError::MalformedKeySet {
            reason: e.to_string(),
        })
    }
}

/// Options matching what `authority` mints.
pub fn options_for(authority: &TestAuthority) -> IdentityVerifierOptions {
    IdentityVerifierOptions::new(authority.issuer()).with_audience(authority.audience())
}

/// Verifier over `authority`'s current key set.
pub async fn verifier_for(
    authority: &TestAuthority,
    cooldown: Duration,
) -> (IdentityTokenVerifier, Arc<CountingFetcher>) {
    let fetcher = CountingFetcher::new(authority.jwks());
    let verifier = IdentityTokenVerifier::with_fetcher(
        &StaticDiscovery::new(),
        options_for(authority).with_key_set_cooldown(cooldown),
        fetcher.clone(),
    )
    .await
    .unwrap();
    (verifier, fetcher)
}
