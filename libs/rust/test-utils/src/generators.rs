//! Shared proptest generators.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use proptest::prelude::*;

/// Raw shared-secret bytes of realistic length.
pub fn secret_bytes_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 16..64)
}

/// Base64url shared secrets (unpadded).
pub fn secret_strategy() -> impl Strategy<Value = String> {
    secret_bytes_strategy().prop_map(|bytes| URL_SAFE_NO_PAD.encode(bytes))
}

/// Ordered lists of distinct base64url secrets.
pub fn secret_list_strategy(max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::hash_set(secret_strategy(), 1..=max.max(1))
        .prop_map(|secrets| secrets.into_iter().collect())
}

/// Key ids as found in published key sets.
pub fn kid_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_-]{1,40}"
}

/// User entity references such as `user:default/jane`.
pub fn entity_ref_strategy() -> impl Strategy<Value = String> {
    ("(user|group)", "[a-z]{3,10}", "[a-z0-9._-]{1,20}")
        .prop_map(|(kind, namespace, name)| format!("{kind}:{namespace}/{name}"))
}

/// Ownership lists, possibly empty.
pub fn ownership_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(entity_ref_strategy(), 0..5)
}

/// Strings that are not three-segment compact tokens.
pub fn malformed_token_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        "[A-Za-z0-9_-]{1,60}",
        "[A-Za-z0-9_-]{1,30}\\.[A-Za-z0-9_-]{1,30}",
        "[ -~]{1,80}".prop_filter("not a compact token", |s| s.split('.').count() != 3),
    ]
}
