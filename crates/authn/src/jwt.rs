//! Token decoding, verification and claims.
//!
//! [`TokenVerifier`] checks a compact token against a [`KeySet`] under one
//! pinned algorithm:
//!
//! ```text
//! token → decode header → kid → KeySet lookup → pinned algorithm check
//!       → signature + exp/nbf check → ClaimSet
//! ```
//!
//! Every failure collapses into the uniform [`InvalidToken`] so callers
//! cannot tell which step failed. The [`VerifyDiagnostic`] it carries is for
//! logs only.
//!
//! # Example
//!
//! ```no_run
//! use jsonwebtoken::Algorithm;
//! use tokengate_authn::{jwt::TokenVerifier, key_set::KeySet};
//!
//! # fn example(token: &str, keys: &KeySet) -> Result<(), Box<dyn std::error::Error>> {
//! let verifier = TokenVerifier::new(Algorithm::RS256);
//! let claims = verifier.verify(token, keys)?;
//! println!("subject: {:?}", claims.subject());
//! # Ok(())
//! # }
//! ```

use jsonwebtoken::{Algorithm, Header, Validation, decode, decode_header};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::{InvalidToken, VerifyDiagnostic},
    key_set::KeySet,
};

/// The decoded payload of a verified token.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimSet(Map<String, Value>);

impl ClaimSet {
    /// Wraps a claim map.
    #[must_use]
    pub fn new(claims: Map<String, Value>) -> Self {
        Self(claims)
    }

    /// Looks up a claim by its full name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Looks up `<namespace>/<name>`.
    #[must_use]
    pub fn namespaced(&self, namespace: &str, name: &str) -> Option<&Value> {
        self.0.get(&namespaced_claim(namespace, name))
    }

    /// The `sub` claim, if it is a string.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.get("sub").and_then(Value::as_str)
    }

    /// The `iss` claim, if it is a string.
    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.get("iss").and_then(Value::as_str)
    }

    /// The `exp` claim, if it is an integer.
    #[must_use]
    pub fn expiry(&self) -> Option<i64> {
        self.get("exp").and_then(Value::as_i64)
    }

    /// Borrows the underlying map.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consumes the set, returning the underlying map.
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for ClaimSet {
    fn from(claims: Map<String, Value>) -> Self {
        Self(claims)
    }
}

/// Builds the full name of a namespaced claim.
#[must_use]
pub fn namespaced_claim(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Decode a token header without verification.
///
/// # Errors
///
/// Returns [`InvalidToken`] with [`VerifyDiagnostic::MalformedHeader`] if the
/// header cannot be decoded.
pub fn decode_token_header(token: &str) -> Result<Header, InvalidToken> {
    decode_header(token).map_err(|_| InvalidToken::new(VerifyDiagnostic::MalformedHeader))
}

/// Verifies compact tokens under one pinned algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenVerifier {
    algorithm: Algorithm,
}

impl TokenVerifier {
    /// Creates a verifier pinned to `algorithm`.
    #[must_use]
    pub fn new(algorithm: Algorithm) -> Self {
        Self { algorithm }
    }

    /// The pinned algorithm.
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Verify `token` against `keys` and return its claims.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidToken`] if:
    /// - the header cannot be decoded or has no `kid`
    /// - the `kid` is not in `keys`
    /// - the header's or the key's algorithm is not the pinned algorithm
    /// - the signature does not verify, or `exp`/`nbf` are out of range
    /// - the payload is not a JSON object
    #[tracing::instrument(skip(self, token, keys), fields(alg = ?self.algorithm))]
    pub fn verify(&self, token: &str, keys: &KeySet) -> Result<ClaimSet, InvalidToken> {
        let header = decode_token_header(token)?;

        let kid = header.kid.ok_or(InvalidToken::new(VerifyDiagnostic::MissingKid))?;
        let key = keys.get(&kid).ok_or(InvalidToken::new(VerifyDiagnostic::UnknownKey))?;

        if header.alg != self.algorithm || key.algorithm() != self.algorithm {
            return Err(InvalidToken::new(VerifyDiagnostic::AlgorithmMismatch));
        }

        let mut validation = Validation::new(self.algorithm);
        // exp and nbf are checked only when present
        validation.required_spec_claims.clear();
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;

        let data = decode::<Map<String, Value>>(token, key.decoding_key(), &validation)?;

        tracing::debug!(kid = %kid, "token verified");
        Ok(ClaimSet(data.claims))
    }
}
