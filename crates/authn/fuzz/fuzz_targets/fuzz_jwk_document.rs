//! Fuzz target for JWK document loading.
//!
//! Feeds arbitrary byte strings as key documents. Loading must never panic,
//! and a failed load must leave the previously published key set in place.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tokengate_authn::{SharedKeySet, validation::{JwkValidator, Validator}};

const BASELINE: &str = r#"{"keys": [{"kty": "oct", "alg": "HS256", "kid": "baseline", "k": "c2VjcmV0LXNlY3JldA"}]}"#;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    // Entry validation must not panic on any JSON value
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
        let _ = JwkValidator.validate(&value);
    }

    let keys = SharedKeySet::unavailable();
    if keys.load_document(BASELINE).is_err() {
        return;
    }

    if keys.load_document(raw).is_err() {
        let current = keys.snapshot();
        assert!(
            current.is_some_and(|set| set.get("baseline").is_some()),
            "failed load replaced the published key set"
        );
    }
});
