//! Structured fuzz target for token verification.
//!
//! Uses the `arbitrary` crate to generate token-like inputs (header algorithm,
//! kid, claims, signature bytes), assembles them into compact tokens and runs
//! them through the verifier and the authenticator. No input may panic, and no
//! forged signature may ever verify.

#![no_main]

use std::sync::LazyLock;

use arbitrary::Arbitrary;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::Algorithm;
use libfuzzer_sys::fuzz_target;
use serde_json::{Map, Value};
use tokengate_authn::{Key, KeySet, TokenVerifier, jwt::decode_token_header};

const KID: &str = "fuzz-key";

static KEYS: LazyLock<KeySet> = LazyLock::new(|| {
    let mut set = KeySet::new();
    if let Ok(key) = Key::symmetric(KID, Algorithm::HS256, b"fuzz-secret-0123456789") {
        let _ = set.add(key);
    }
    set
});

/// Structured input representing a fuzzed token.
#[derive(Debug, Arbitrary)]
struct FuzzedToken {
    /// Algorithm string for the header
    alg: FuzzedAlg,
    /// Whether to use the known kid, an arbitrary one, or none
    kid: FuzzedKid,
    /// Whether to include a type field in the header
    include_typ: bool,
    /// Subject claim
    sub: Option<String>,
    /// Expiration timestamp
    exp: Option<i64>,
    /// Not-before timestamp
    nbf: Option<i64>,
    /// Namespaced roles claim
    roles: Vec<String>,
    /// Raw signature bytes
    signature_bytes: Vec<u8>,
}

/// Fuzzed algorithm values covering known attack vectors and edge cases.
#[derive(Debug, Arbitrary)]
enum FuzzedAlg {
    /// The pinned algorithm
    HS256,
    /// Algorithm substitution: "none"
    None,
    /// Other HMAC strengths
    HS384,
    HS512,
    /// Asymmetric algorithms
    RS256,
    EdDSA,
    /// Arbitrary string
    Other(String),
}

impl FuzzedAlg {
    fn as_str(&self) -> &str {
        match self {
            Self::HS256 => "HS256",
            Self::None => "none",
            Self::HS384 => "HS384",
            Self::HS512 => "HS512",
            Self::RS256 => "RS256",
            Self::EdDSA => "EdDSA",
            Self::Other(s) => s,
        }
    }
}

#[derive(Debug, Arbitrary)]
enum FuzzedKid {
    Known,
    Missing,
    Other(String),
}

fn build_token(input: &FuzzedToken) -> String {
    let mut header = Map::new();
    header.insert("alg".to_owned(), Value::from(input.alg.as_str()));
    if input.include_typ {
        header.insert("typ".to_owned(), Value::from("JWT"));
    }
    match &input.kid {
        FuzzedKid::Known => {
            header.insert("kid".to_owned(), Value::from(KID));
        },
        FuzzedKid::Other(kid) => {
            header.insert("kid".to_owned(), Value::from(kid.as_str()));
        },
        FuzzedKid::Missing => {},
    }

    let mut payload = Map::new();
    if let Some(sub) = &input.sub {
        payload.insert("sub".to_owned(), Value::from(sub.as_str()));
    }
    if let Some(exp) = input.exp {
        payload.insert("exp".to_owned(), Value::from(exp));
    }
    if let Some(nbf) = input.nbf {
        payload.insert("nbf".to_owned(), Value::from(nbf));
    }
    payload.insert("https://ns.example/roles".to_owned(), Value::from(input.roles.clone()));

    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&Value::Object(header)).unwrap_or_default());
    let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&Value::Object(payload)).unwrap_or_default());
    let sig_b64 = URL_SAFE_NO_PAD.encode(&input.signature_bytes);

    format!("{header_b64}.{payload_b64}.{sig_b64}")
}

fuzz_target!(|input: FuzzedToken| {
    let token = build_token(&input);

    // Header decoding must not panic
    let _ = decode_token_header(&token);

    // A forged signature never verifies
    let result = TokenVerifier::new(Algorithm::HS256).verify(&token, &KEYS);
    assert!(result.is_err(), "forged token verified: {input:?}");
    if let Err(err) = result {
        assert_eq!(err.to_string(), "Invalid token");
    }
});
