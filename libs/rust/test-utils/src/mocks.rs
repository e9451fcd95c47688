//! Mock key-set endpoints.
//!
//! Helpers mounting the auth plugin's JWKS route on a [`wiremock::MockServer`].

use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path of the key-set document under a host-discovery base URL.
pub const JWKS_PATH: &str = "/api/auth/.well-known/jwks.json";

/// Serves `jwks` on [`JWKS_PATH`], expecting exactly `expected_calls` requests.
pub async fn mount_jwks(server: &MockServer, jwks: &Value, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks))
        .expect(expected_calls)
        .mount(server)
        .await;
}

/// Serves `jwks` for at most `limit` requests, after which later mounts apply.
pub async fn mount_jwks_limited(server: &MockServer, jwks: &Value, limit: u64) {
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks))
        .up_to_n_times(limit)
        .mount(server)
        .await;
}

/// Answers [`JWKS_PATH`] with `status` and a plain body.
pub async fn mount_jwks_error(server: &MockServer, status: u16, body: &str) {
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(server)
        .await;
}
