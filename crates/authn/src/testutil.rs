//! Shared test utilities for authentication testing.
//!
//! Helpers for generating RSA and Ed25519 key pairs, rendering them as JWK
//! entries, signing tokens, and crafting raw tokens for attack testing. The
//! module is feature-gated behind `testutil` to keep it out of production
//! builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! tokengate-authn = { path = "../authn", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use tokengate_authn::testutil::{rsa_test_key, rsa_jwk, sign_rsa_token};
//! ```

use std::sync::OnceLock;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use ed25519_dalek::SigningKey;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rand_core::OsRng;
use rsa::{
    RsaPrivateKey,
    pkcs1::{EncodeRsaPrivateKey, LineEnding},
    traits::PublicKeyParts,
};
use serde_json::{Value, json};
use zeroize::Zeroizing;

/// An RSA key pair for tests: private PEM plus JWK public components.
pub struct RsaTestKey {
    /// PKCS#1 PEM private key.
    pub private_pem: Zeroizing<String>,
    /// Base64url modulus.
    pub n: String,
    /// Base64url public exponent.
    pub e: String,
}

static PRIMARY_RSA: OnceLock<RsaTestKey> = OnceLock::new();
static SECONDARY_RSA: OnceLock<RsaTestKey> = OnceLock::new();

/// Generates a fresh 2048-bit RSA key pair.
///
/// Slow; prefer [`rsa_test_key`] and [`other_rsa_test_key`], which are
/// generated once per process.
///
/// # Panics
///
/// Panics if key generation or PEM encoding fails.
pub fn generate_rsa_keypair() -> RsaTestKey {
    let private = RsaPrivateKey::new(&mut OsRng, 2048).expect("RSA key generation");
    let private_pem = private.to_pkcs1_pem(LineEnding::LF).expect("PKCS#1 PEM encoding");
    RsaTestKey {
        private_pem,
        n: URL_SAFE_NO_PAD.encode(private.n().to_bytes_be()),
        e: URL_SAFE_NO_PAD.encode(private.e().to_bytes_be()),
    }
}

/// Process-wide RSA test key.
pub fn rsa_test_key() -> &'static RsaTestKey {
    PRIMARY_RSA.get_or_init(generate_rsa_keypair)
}

/// A second process-wide RSA test key, distinct from [`rsa_test_key`].
pub fn other_rsa_test_key() -> &'static RsaTestKey {
    SECONDARY_RSA.get_or_init(generate_rsa_keypair)
}

/// Renders an RSA key's public half as a JWK entry.
pub fn rsa_jwk(kid: &str, key: &RsaTestKey) -> Value {
    json!({
        "kty": "RSA",
        "alg": "RS256",
        "use": "sig",
        "kid": kid,
        "n": key.n,
        "e": key.e,
    })
}

/// Generates a test Ed25519 key pair.
///
/// Returns `(pkcs8_der, public_key_base64url)`; the private key is wrapped in
/// [`Zeroizing`] so it is scrubbed from memory on drop.
pub fn generate_ed25519_keypair() -> (Zeroizing<Vec<u8>>, String) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let public_key_b64 = URL_SAFE_NO_PAD.encode(signing_key.verifying_key().to_bytes());

    let private_bytes: Zeroizing<[u8; 32]> = Zeroizing::new(signing_key.to_bytes());
    let mut pkcs8_der = Zeroizing::new(vec![
        0x30, 0x2e, // SEQUENCE, 46 bytes
        0x02, 0x01, 0x00, // INTEGER version 0
        0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
        0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
        0x04, 0x22, // OCTET STRING, 34 bytes
        0x04, 0x20, // OCTET STRING, 32 bytes (the actual key)
    ]);
    pkcs8_der.extend_from_slice(&*private_bytes);

    (pkcs8_der, public_key_b64)
}

/// Renders an Ed25519 public key as a JWK entry.
pub fn ed25519_jwk(kid: &str, public_key_b64: &str) -> Value {
    json!({"kty": "OKP", "crv": "Ed25519", "alg": "EdDSA", "kid": kid, "x": public_key_b64})
}

/// Wraps JWK entries in a `{"keys": [...]}` document.
pub fn jwk_document(entries: impl IntoIterator<Item = Value>) -> String {
    json!({"keys": entries.into_iter().collect::<Vec<_>>()}).to_string()
}

/// `claims` with `exp` set one hour from now.
pub fn expiring_in_an_hour(claims: &Value) -> Value {
    let mut claims = claims.clone();
    if let Some(map) = claims.as_object_mut() {
        map.insert("exp".to_owned(), json!(Utc::now().timestamp() + 3600));
    }
    claims
}

fn encode(alg: Algorithm, kid: &str, claims: &Value, key: &EncodingKey) -> String {
    let mut header = Header::new(alg);
    header.kid = Some(kid.to_owned());
    jsonwebtoken::encode(&header, claims, key).expect("Failed to encode test token")
}

/// Signs `claims` with an RSA test key under RS256.
///
/// Claims are signed as given; use [`expiring_in_an_hour`] to add an `exp`.
///
/// # Panics
///
/// Panics if the PEM cannot be loaded or encoding fails.
pub fn sign_rsa_token(key: &RsaTestKey, kid: &str, claims: &Value) -> String {
    let encoding_key = EncodingKey::from_rsa_pem(key.private_pem.as_bytes()).expect("RSA PEM");
    encode(Algorithm::RS256, kid, claims, &encoding_key)
}

/// Signs `claims` with an Ed25519 PKCS#8 DER key under EdDSA.
pub fn sign_ed25519_token(pkcs8_der: &[u8], kid: &str, claims: &Value) -> String {
    encode(Algorithm::EdDSA, kid, claims, &EncodingKey::from_ed_der(pkcs8_der))
}

/// Signs `claims` with an HMAC secret.
pub fn sign_hmac_token(secret: &[u8], alg: Algorithm, kid: &str, claims: &Value) -> String {
    encode(alg, kid, claims, &EncodingKey::from_secret(secret))
}

/// Creates a raw token from arbitrary header and payload JSON.
///
/// The result is `{header_b64}.{payload_b64}.` with an empty signature, for
/// testing rejection of `alg: "none"` and similar attack tokens.
///
/// # Panics
///
/// Panics if JSON serialization fails.
pub fn craft_raw_token(header_json: &Value, payload_json: &Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

/// Asserts that a `Result<T, AuthError>` is an `Err` matching the given
/// [`AuthError`](crate::error::AuthError) variant.
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use tokengate_authn::assert_auth_error;
/// use tokengate_authn::error::AuthError;
///
/// let result: Result<(), AuthError> = Err(AuthError::NotAuthorized);
/// assert_auth_error!(result, NotAuthorized);
/// ```
#[macro_export]
macro_rules! assert_auth_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "expected AuthError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
    ($result:expr, $variant:ident, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "{}: expected AuthError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            $result,
        );
    };
}
