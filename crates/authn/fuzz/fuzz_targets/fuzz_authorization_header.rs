//! Fuzz target for `Authorization` header handling.
//!
//! Feeds arbitrary byte strings as header values through splitting, format
//! validation and the full authenticator. Every input must produce an outcome
//! without panicking, and the stage that rejects it must agree with the
//! splitting and format rules.

#![no_main]

use std::sync::LazyLock;

use jsonwebtoken::Algorithm;
use libfuzzer_sys::fuzz_target;
use tokengate_authn::{
    AuthFailure, Authenticator, Key, KeySet, SharedKeySet,
    middleware::split_authorization,
    validation::{TokenFormatValidator, Validator},
};

static AUTHENTICATOR: LazyLock<Authenticator> = LazyLock::new(|| {
    let mut set = KeySet::new();
    if let Ok(key) = Key::symmetric("fuzz-key", Algorithm::HS256, b"fuzz-secret-0123456789") {
        let _ = set.add(key);
    }
    Authenticator::new(SharedKeySet::from(set), ["Bearer"], Algorithm::HS256)
});

fuzz_target!(|data: &[u8]| {
    // Header values that reach the authenticator are always UTF-8
    let Ok(header) = std::str::from_utf8(data) else {
        return;
    };

    let parts = split_authorization(header);
    assert!(!parts.is_empty(), "splitting always yields at least one part");

    let result = AUTHENTICATOR.authenticate_str(header);

    match parts.as_slice() {
        [scheme, credential] => {
            if *scheme != "Bearer" {
                assert_eq!(result, Err(AuthFailure::UnsupportedScheme));
            } else if !TokenFormatValidator.validate(*credential) {
                assert_eq!(result, Err(AuthFailure::MalformedToken));
            } else {
                assert!(matches!(result, Ok(_) | Err(AuthFailure::InvalidToken(_))));
            }
        },
        _ => assert_eq!(result, Err(AuthFailure::MalformedHeader)),
    }
});
