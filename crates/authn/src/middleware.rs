//! Request authentication.
//!
//! [`Authenticator`] turns the `Authorization` header of one request into an
//! [`AuthOutcome`]: either a verified [`ClaimSet`] or a typed [`AuthFailure`].
//! It never rejects a request itself; the outcome is attached and routes
//! decide whether authentication is required.
//!
//! ```text
//! no header            → MissingHeader
//! not "<scheme> <cred>"→ MalformedHeader
//! scheme not allowed   → UnsupportedScheme
//! cred not a.b.c       → MalformedToken
//! no key set published → KeySetUnavailable
//! verification fails   → InvalidToken
//! otherwise            → Authenticated(claims)
//! ```

use std::sync::Arc;

use http::{HeaderMap, HeaderValue, header::AUTHORIZATION};
use jsonwebtoken::Algorithm;
use thiserror::Error;

use crate::{
    error::{ErrorClass, InvalidToken},
    jwt::{ClaimSet, TokenVerifier},
    key_set::SharedKeySet,
    validation::{TokenFormatValidator, Validator},
};

/// Why a request is not authenticated.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthFailure {
    /// No `Authorization` header.
    #[error("Missing \"Authorization\" header")]
    MissingHeader,

    /// The header is not exactly `<scheme> <credential>`.
    #[error("Invalid \"Authorization\" header")]
    MalformedHeader,

    /// The scheme is not in the allow-list.
    #[error("Invalid Bearer in \"Authorization\" header")]
    UnsupportedScheme,

    /// The credential is not a three-segment compact token.
    #[error("Invalid Token in \"Authorization\" header")]
    MalformedToken,

    /// No key set is published. This is a server fault.
    #[error("Failed to access key set")]
    KeySetUnavailable,

    /// Verification failed.
    #[error("Token verification failed")]
    InvalidToken(#[source] InvalidToken),

    /// No outcome was attached to the request.
    #[error("Invalid Token")]
    NotAuthenticated,
}

impl AuthFailure {
    /// Classification for response rendering.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::KeySetUnavailable => ErrorClass::Internal,
            _ => ErrorClass::Unauthorized,
        }
    }

    /// Stable snake_case code for structured logs.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingHeader => "missing_header",
            Self::MalformedHeader => "malformed_header",
            Self::UnsupportedScheme => "unsupported_scheme",
            Self::MalformedToken => "malformed_token",
            Self::KeySetUnavailable => "key_set_unavailable",
            Self::InvalidToken(_) => "invalid_token",
            Self::NotAuthenticated => "not_authenticated",
        }
    }
}

/// Result of authenticating one request. Exactly one per request.
#[derive(Clone, Debug, PartialEq)]
pub enum AuthOutcome {
    /// The token verified; these are its claims.
    Authenticated(Arc<ClaimSet>),
    /// The request is not authenticated.
    Rejected(AuthFailure),
}

impl AuthOutcome {
    /// Verified claims, if authenticated.
    #[must_use]
    pub fn claims(&self) -> Option<&ClaimSet> {
        match self {
            Self::Authenticated(claims) => Some(claims),
            Self::Rejected(_) => None,
        }
    }

    /// The failure, if rejected.
    #[must_use]
    pub fn failure(&self) -> Option<&AuthFailure> {
        match self {
            Self::Authenticated(_) => None,
            Self::Rejected(failure) => Some(failure),
        }
    }

    /// Whether the request is authenticated.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    /// Borrows the outcome as a `Result`.
    ///
    /// # Errors
    ///
    /// Returns the failure if rejected.
    pub fn as_result(&self) -> Result<&ClaimSet, &AuthFailure> {
        match self {
            Self::Authenticated(claims) => Ok(claims),
            Self::Rejected(failure) => Err(failure),
        }
    }

    /// Reads the outcome attached to a request.
    ///
    /// A request that never passed through the authentication layer reads as
    /// [`AuthFailure::NotAuthenticated`].
    #[must_use]
    pub fn from_extensions(extensions: &http::Extensions) -> Self {
        extensions
            .get::<Self>()
            .cloned()
            .unwrap_or(Self::Rejected(AuthFailure::NotAuthenticated))
    }
}

impl From<Result<ClaimSet, AuthFailure>> for AuthOutcome {
    fn from(result: Result<ClaimSet, AuthFailure>) -> Self {
        match result {
            Ok(claims) => Self::Authenticated(Arc::new(claims)),
            Err(failure) => Self::Rejected(failure),
        }
    }
}

/// Splits an `Authorization` header value into its parts.
///
/// Runs of whitespace collapse to a single space before splitting on a
/// space, so `"Bearer  abc.def.ghi"` yields `["Bearer", "abc.def.ghi"]`.
/// Leading or trailing whitespace produces an empty part.
#[must_use]
pub fn split_authorization(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = value;
    loop {
        match rest.find(char::is_whitespace) {
            Some(start) => {
                parts.push(&rest[..start]);
                let tail = &rest[start..];
                rest = tail.trim_start_matches(char::is_whitespace);
            },
            None => {
                parts.push(rest);
                break;
            },
        }
    }
    parts
}

/// Authenticates requests against an external key set.
///
/// Holds no per-request state. Cloning is cheap.
#[derive(Clone, Debug)]
pub struct Authenticator {
    keys: SharedKeySet,
    bearers: Arc<[String]>,
    verifier: TokenVerifier,
}

impl Authenticator {
    /// Creates an authenticator.
    ///
    /// `bearers` is the case-sensitive allow-list of accepted schemes and
    /// `algorithm` the algorithm pinned for this trust boundary.
    #[must_use]
    pub fn new(
        keys: SharedKeySet,
        bearers: impl IntoIterator<Item = impl Into<String>>,
        algorithm: Algorithm,
    ) -> Self {
        Self {
            keys,
            bearers: bearers.into_iter().map(Into::into).collect(),
            verifier: TokenVerifier::new(algorithm),
        }
    }

    /// The key set this authenticator reads from.
    #[must_use]
    pub fn key_set(&self) -> &SharedKeySet {
        &self.keys
    }

    /// Whether `scheme` is an allowed bearer scheme.
    #[must_use]
    pub fn is_allowed_scheme(&self, scheme: &str) -> bool {
        self.bearers.iter().any(|b| b == scheme)
    }

    /// Authenticates from a request's headers, using the first
    /// `Authorization` header.
    #[must_use]
    pub fn authenticate_headers(&self, headers: &HeaderMap) -> AuthOutcome {
        self.authenticate_value(headers.get(AUTHORIZATION))
    }

    /// Authenticates from a raw header value.
    #[must_use]
    pub fn authenticate_value(&self, value: Option<&HeaderValue>) -> AuthOutcome {
        let outcome = match value {
            None => Err(AuthFailure::MissingHeader),
            Some(value) => match value.to_str() {
                Ok(value) => self.authenticate_str(value),
                Err(_) => Err(AuthFailure::MalformedHeader),
            },
        };
        log_outcome(&outcome);
        outcome.into()
    }

    /// Authenticates from an `Authorization` header string.
    ///
    /// # Errors
    ///
    /// Returns the [`AuthFailure`] for the first stage that fails.
    pub fn authenticate_str(&self, header: &str) -> Result<ClaimSet, AuthFailure> {
        let parts = split_authorization(header);
        let [scheme, credential] = parts[..] else {
            return Err(AuthFailure::MalformedHeader);
        };

        if !self.is_allowed_scheme(scheme) {
            return Err(AuthFailure::UnsupportedScheme);
        }

        if !TokenFormatValidator.validate(credential) {
            return Err(AuthFailure::MalformedToken);
        }

        let keys = self.keys.snapshot().filter(|set| !set.is_empty());
        let Some(keys) = keys else {
            return Err(AuthFailure::KeySetUnavailable);
        };

        self.verifier.verify(credential, &keys).map_err(AuthFailure::InvalidToken)
    }
}

fn log_outcome(outcome: &Result<ClaimSet, AuthFailure>) {
    match outcome {
        Ok(claims) => tracing::debug!(sub = ?claims.subject(), "request authenticated"),
        Err(AuthFailure::KeySetUnavailable) => {
            tracing::warn!(failure = "key_set_unavailable", "no key set available for authentication");
        },
        Err(AuthFailure::InvalidToken(err)) => tracing::debug!(
            failure = "invalid_token",
            diagnostic = %err.diagnostic(),
            "request not authenticated"
        ),
        Err(failure) => tracing::debug!(failure = failure.code(), "request not authenticated"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use chrono::Utc;
    use jsonwebtoken::{EncodingKey, Header};
    use proptest::prelude::*;
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::{
        error::VerifyDiagnostic,
        key_set::{Key, KeySet},
    };

    const SECRET: &[u8] = b"0123456789abcdef";

    fn authenticator() -> Authenticator {
        let mut set = KeySet::new();
        set.add(Key::symmetric("k1", Algorithm::HS256, SECRET).unwrap()).unwrap();
        Authenticator::new(SharedKeySet::from(set), ["Bearer"], Algorithm::HS256)
    }

    fn token(kid: &str) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(kid.to_owned());
        let claims = json!({"sub": "u1", "exp": Utc::now().timestamp() + 3600});
        jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    #[rstest]
    #[case("Bearer abc", vec!["Bearer", "abc"])]
    #[case("Bearer  abc.def.ghi", vec!["Bearer", "abc.def.ghi"])]
    #[case("Bearer\t \nabc", vec!["Bearer", "abc"])]
    #[case("Bearer", vec!["Bearer"])]
    #[case("Bearer a b", vec!["Bearer", "a", "b"])]
    #[case(" Bearer abc", vec!["", "Bearer", "abc"])]
    #[case("Bearer abc ", vec!["Bearer", "abc", ""])]
    #[case("", vec![""])]
    fn test_split_authorization(#[case] value: &str, #[case] expected: Vec<&str>) {
        assert_eq!(split_authorization(value), expected);
    }

    #[test]
    fn test_missing_header() {
        let outcome = authenticator().authenticate_headers(&HeaderMap::new());
        assert_eq!(outcome, AuthOutcome::Rejected(AuthFailure::MissingHeader));
    }

    #[rstest]
    #[case::one_part("Bearer")]
    #[case::three_parts("Bearer a.b.c extra")]
    #[case::empty("")]
    #[case::leading_space(" Bearer a.b.c")]
    fn test_malformed_header(#[case] value: &str) {
        let err = authenticator().authenticate_str(value).unwrap_err();
        assert_eq!(err, AuthFailure::MalformedHeader);
    }

    #[rstest]
    #[case("bearer")]
    #[case("BEARER")]
    #[case("Basic")]
    fn test_scheme_is_case_sensitive(#[case] scheme: &str) {
        let header = format!("{scheme} {}", token("k1"));
        let err = authenticator().authenticate_str(&header).unwrap_err();
        assert_eq!(err, AuthFailure::UnsupportedScheme);
    }

    #[rstest]
    #[case("abc")]
    #[case("abc.def")]
    #[case("a..c")]
    fn test_malformed_token(#[case] credential: &str) {
        let err = authenticator().authenticate_str(&format!("Bearer {credential}")).unwrap_err();
        assert_eq!(err, AuthFailure::MalformedToken);
    }

    #[test]
    fn test_double_space_passes_scheme_and_format() {
        // Fails only at verification, so scheme and format stages passed.
        let err = authenticator().authenticate_str("Bearer  abc.def.ghi").unwrap_err();
        assert!(matches!(err, AuthFailure::InvalidToken(_)));
    }

    #[test]
    fn test_key_set_unavailable() {
        let auth = Authenticator::new(SharedKeySet::unavailable(), ["Bearer"], Algorithm::HS256);
        let err = auth.authenticate_str(&format!("Bearer {}", token("k1"))).unwrap_err();
        assert_eq!(err, AuthFailure::KeySetUnavailable);
        assert_eq!(err.class(), ErrorClass::Internal);
    }

    #[test]
    fn test_empty_key_set_is_unavailable() {
        let auth = Authenticator::new(SharedKeySet::from(KeySet::new()), ["Bearer"], Algorithm::HS256);
        let err = auth.authenticate_str(&format!("Bearer {}", token("k1"))).unwrap_err();
        assert_eq!(err, AuthFailure::KeySetUnavailable);
    }

    #[test]
    fn test_unknown_kid_is_invalid_token() {
        let err = authenticator().authenticate_str(&format!("Bearer {}", token("other"))).unwrap_err();
        match err {
            AuthFailure::InvalidToken(inner) => {
                assert_eq!(inner.diagnostic(), VerifyDiagnostic::UnknownKey);
            },
            other => panic!("expected InvalidToken, got {other:?}"),
        }
    }

    #[test]
    fn test_success() {
        let value = HeaderValue::from_str(&format!("Bearer {}", token("k1"))).unwrap();
        let outcome = authenticator().authenticate_value(Some(&value));
        assert!(outcome.is_authenticated());
        assert_eq!(outcome.claims().unwrap().subject(), Some("u1"));
    }

    #[test]
    fn test_non_utf8_header_is_malformed() {
        let value = HeaderValue::from_bytes(b"Bearer \xfa.b.c").unwrap();
        let outcome = authenticator().authenticate_value(Some(&value));
        assert_eq!(outcome.failure(), Some(&AuthFailure::MalformedHeader));
    }

    #[test]
    fn test_multiple_bearers_allowed() {
        let mut set = KeySet::new();
        set.add(Key::symmetric("k1", Algorithm::HS256, SECRET).unwrap()).unwrap();
        let auth = Authenticator::new(SharedKeySet::from(set), ["Bearer", "JWT"], Algorithm::HS256);
        assert!(auth.authenticate_str(&format!("JWT {}", token("k1"))).is_ok());
        assert!(auth.authenticate_str(&format!("Bearer {}", token("k1"))).is_ok());
    }

    #[test]
    fn test_outcome_from_empty_extensions() {
        let outcome = AuthOutcome::from_extensions(&http::Extensions::new());
        assert_eq!(outcome, AuthOutcome::Rejected(AuthFailure::NotAuthenticated));
    }

    proptest! {
        /// Any header that does not split into exactly two parts is malformed.
        #[test]
        fn wrong_part_count_is_malformed(
            parts in proptest::collection::vec("[A-Za-z0-9.]{1,12}", 1..6usize)
                .prop_filter("not two", |p| p.len() != 2),
            sep in "[ \t]{1,3}",
        ) {
            let header = parts.join(&sep);
            prop_assert_eq!(authenticator().authenticate_str(&header), Err(AuthFailure::MalformedHeader));
        }

        /// Whitespace runs between scheme and credential never matter.
        #[test]
        fn whitespace_runs_collapse(sep in "[ \t]{1,5}") {
            let header = format!("Bearer{sep}abc.def.ghi");
            prop_assert_eq!(split_authorization(&header), vec!["Bearer", "abc.def.ghi"]);
        }
    }
}
