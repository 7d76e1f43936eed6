//! Structural validators and algorithm policy.
//!
//! Validators run before any cryptographic work so malformed input fails
//! fast. Each validator has two forms: [`Validator::check`] raises a
//! descriptive [`ValidationError`] on the first violation, and
//! [`Validator::validate`] collapses that to a boolean.
//!
//! # Algorithm policy
//!
//! - `none` is never accepted
//! - the external trust boundary only accepts asymmetric algorithms
//! - the internal boundary only accepts HMAC algorithms

use jsonwebtoken::Algorithm;
use serde_json::Value;

use crate::error::{AuthError, ValidationError};

/// Maximum accepted length of a compact token, in bytes.
pub const MAX_TOKEN_LENGTH: usize = 8 * 1024;

/// JWK members that must be non-empty strings when present.
pub const JWK_STRING_FIELDS: &[&str] = &["alg", "kty", "use", "n", "e", "kid", "x5t"];

/// Algorithms that are never accepted.
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none"];

/// Algorithms accepted for tokens from the external identity provider.
pub const EXTERNAL_ALGORITHMS: &[&str] = &["RS256", "RS384", "RS512", "EdDSA"];

/// Algorithms accepted for tokens this service issues itself.
pub const INTERNAL_ALGORITHMS: &[&str] = &["HS256", "HS384", "HS512"];

/// A structural validator over some input type.
pub trait Validator<T: ?Sized> {
    /// Checks `value`, returning the first violation.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] describing the first violated rule.
    fn check(&self, value: &T) -> Result<(), ValidationError>;

    /// Returns whether `value` passes [`check`](Self::check).
    fn validate(&self, value: &T) -> bool {
        self.check(value).is_ok()
    }
}

/// Validates the minimal shape of one JWK entry.
///
/// Every member is optional. When present, `alg`, `kty`, `use`, `n`, `e`,
/// `kid` and `x5t` must be non-empty strings and `x5c` must be an array of
/// non-empty strings. The entry itself must be a JSON object.
#[derive(Clone, Copy, Debug, Default)]
pub struct JwkValidator;

impl Validator<Value> for JwkValidator {
    fn check(&self, value: &Value) -> Result<(), ValidationError> {
        let entry = value.as_object().ok_or_else(|| ValidationError::wrong_type("value", "an object"))?;

        for field in JWK_STRING_FIELDS {
            if let Some(member) = entry.get(*field) {
                check_non_empty_string(field, member)?;
            }
        }

        if let Some(chain) = entry.get("x5c") {
            let certs = chain.as_array().ok_or_else(|| ValidationError::wrong_type("x5c", "an array"))?;
            for (i, cert) in certs.iter().enumerate() {
                check_non_empty_string(&format!("x5c[{i}]"), cert)?;
            }
        }

        Ok(())
    }
}

fn check_non_empty_string(field: &str, value: &Value) -> Result<(), ValidationError> {
    match value.as_str() {
        Some("") => Err(ValidationError::empty(field)),
        Some(_) => Ok(()),
        None => Err(ValidationError::wrong_type(field, "a string")),
    }
}

/// Validates the compact-serialization shape of a bearer token.
///
/// The value must be non-empty and consist of exactly three non-empty
/// dot-separated segments. Segments may not contain whitespace, since no
/// base64url encoding produces it.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokenFormatValidator;

impl Validator<str> for TokenFormatValidator {
    fn check(&self, value: &str) -> Result<(), ValidationError> {
        if value.is_empty() {
            return Err(ValidationError::empty("token"));
        }
        if value.len() > MAX_TOKEN_LENGTH {
            return Err(ValidationError::format("token", "exceeds maximum length"));
        }
        if !value.contains('.') {
            return Err(ValidationError::format("token", "missing segment separator"));
        }

        let mut segments = 0;
        for segment in value.split('.') {
            segments += 1;
            if segment.is_empty() {
                return Err(ValidationError::format("token", "empty segment"));
            }
            if segment.chars().any(char::is_whitespace) {
                return Err(ValidationError::format("token", "whitespace in segment"));
            }
        }
        if segments != 3 {
            return Err(ValidationError::format("token", "expected three segments"));
        }

        Ok(())
    }
}

/// Which side of the trust boundary a token comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrustBoundary {
    /// Tokens minted by the external identity provider.
    External,
    /// Tokens minted by this service.
    Internal,
}

impl TrustBoundary {
    /// Algorithm names accepted on this boundary.
    #[must_use]
    pub fn accepted_algorithms(self) -> &'static [&'static str] {
        match self {
            Self::External => EXTERNAL_ALGORITHMS,
            Self::Internal => INTERNAL_ALGORITHMS,
        }
    }
}

/// Validate an algorithm name against the policy for `boundary`.
///
/// # Errors
///
/// Returns [`AuthError::Config`] if the algorithm is forbidden, unknown, or
/// not accepted on `boundary`.
///
/// # Examples
///
/// ```
/// use tokengate_authn::validation::{TrustBoundary, validate_algorithm};
///
/// assert!(validate_algorithm("RS256", TrustBoundary::External).is_ok());
/// assert!(validate_algorithm("HS256", TrustBoundary::External).is_err());
/// assert!(validate_algorithm("HS256", TrustBoundary::Internal).is_ok());
/// assert!(validate_algorithm("none", TrustBoundary::Internal).is_err());
/// ```
pub fn validate_algorithm(alg: &str, boundary: TrustBoundary) -> Result<Algorithm, AuthError> {
    if FORBIDDEN_ALGORITHMS.contains(&alg) {
        return Err(AuthError::config(format!(
            "algorithm '{alg}' is not allowed for security reasons"
        )));
    }

    if !boundary.accepted_algorithms().contains(&alg) {
        return Err(AuthError::config(format!(
            "algorithm '{alg}' is not accepted on the {boundary:?} boundary"
        )));
    }

    alg.parse::<Algorithm>()
        .map_err(|_| AuthError::config(format!("algorithm '{alg}' is not recognized")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_jwk_full_entry_passes() {
        let entry = json!({
            "alg": "RS256",
            "kty": "RSA",
            "use": "sig",
            "n": "0vx7agoebGcQSuu",
            "e": "AQAB",
            "kid": "key-1",
            "x5t": "thumb",
            "x5c": ["MIIC+DCCAeCgAwIBAgIJ"],
        });
        assert!(JwkValidator.check(&entry).is_ok());
    }

    #[test]
    fn test_jwk_empty_object_passes() {
        assert!(JwkValidator.validate(&json!({})));
    }

    #[test]
    fn test_jwk_unlisted_members_are_ignored() {
        assert!(JwkValidator.validate(&json!({"k": "", "exp": "soon"})));
    }

    #[rstest]
    #[case::not_object(json!("RS256"), "value must be an object")]
    #[case::array(json!([]), "value must be an object")]
    #[case::empty_kid(json!({"kid": ""}), "kid must not be empty")]
    #[case::numeric_alg(json!({"alg": 256}), "alg must be a string")]
    #[case::null_n(json!({"n": null}), "n must be a string")]
    #[case::x5c_not_array(json!({"x5c": "cert"}), "x5c must be an array")]
    #[case::x5c_empty_member(json!({"x5c": ["a", ""]}), "x5c[1] must not be empty")]
    #[case::x5c_numeric_member(json!({"x5c": [1]}), "x5c[0] must be a string")]
    fn test_jwk_rejected(#[case] entry: Value, #[case] message: &str) {
        let err = JwkValidator.check(&entry).unwrap_err();
        assert_eq!(err.to_string(), message);
        assert!(!JwkValidator.validate(&entry));
    }

    #[rstest]
    #[case("abc.def.ghi")]
    #[case("eyJhbGciOiJSUzI1NiJ9.eyJzdWIiOiJ1MSJ9.c2ln")]
    fn test_token_format_accepted(#[case] token: &str) {
        assert!(TokenFormatValidator.validate(token));
    }

    #[rstest]
    #[case::empty("")]
    #[case::no_dot("abcdef")]
    #[case::two_segments("abc.def")]
    #[case::four_segments("a.b.c.d")]
    #[case::empty_signature("abc.def.")]
    #[case::empty_header(".def.ghi")]
    #[case::double_dot("abc..ghi")]
    #[case::inner_space("abc.d ef.ghi")]
    fn test_token_format_rejected(#[case] token: &str) {
        assert!(!TokenFormatValidator.validate(token));
    }

    #[test]
    fn test_token_format_rejects_oversized() {
        let segment = "a".repeat(MAX_TOKEN_LENGTH);
        let token = format!("{segment}.b.c");
        let err = TokenFormatValidator.check(&token).unwrap_err();
        assert!(err.to_string().contains("maximum length"));
    }

    #[test]
    fn test_validate_algorithm_none_rejected() {
        for boundary in [TrustBoundary::External, TrustBoundary::Internal] {
            let result = validate_algorithm("none", boundary);
            assert!(
                matches!(result, Err(AuthError::Config(ref msg)) if msg.contains("security reasons"))
            );
        }
    }

    #[rstest]
    #[case("RS256", TrustBoundary::External, Algorithm::RS256)]
    #[case("EdDSA", TrustBoundary::External, Algorithm::EdDSA)]
    #[case("HS256", TrustBoundary::Internal, Algorithm::HS256)]
    #[case("HS512", TrustBoundary::Internal, Algorithm::HS512)]
    fn test_validate_algorithm_accepted(
        #[case] alg: &str,
        #[case] boundary: TrustBoundary,
        #[case] expected: Algorithm,
    ) {
        assert_eq!(validate_algorithm(alg, boundary).unwrap(), expected);
    }

    #[rstest]
    #[case("HS256", TrustBoundary::External)]
    #[case("RS256", TrustBoundary::Internal)]
    #[case("ES256", TrustBoundary::External)]
    #[case("rs256", TrustBoundary::External)]
    fn test_validate_algorithm_rejected(#[case] alg: &str, #[case] boundary: TrustBoundary) {
        assert!(validate_algorithm(alg, boundary).is_err());
    }

    proptest! {
        /// Any three non-empty dot-free segments form an acceptable token.
        #[test]
        fn three_segments_always_pass(
            a in "[A-Za-z0-9_-]{1,40}",
            b in "[A-Za-z0-9_-]{1,40}",
            c in "[A-Za-z0-9_-]{1,40}",
        ) {
            let token = format!("{a}.{b}.{c}");
            prop_assert!(TokenFormatValidator.validate(&token));
        }

        /// Any other segment count is rejected.
        #[test]
        fn wrong_segment_count_rejected(
            segments in proptest::collection::vec("[A-Za-z0-9]{1,8}", 1..8usize)
                .prop_filter("not three", |s| s.len() != 3),
        ) {
            let token = segments.join(".");
            prop_assert!(!TokenFormatValidator.validate(&token));
        }
    }
}
