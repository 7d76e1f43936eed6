//! Authentication error types.
//!
//! Errors fall into three classes (see [`ErrorClass`]): client authentication
//! faults, caller-supplied structural input faults, and server configuration
//! faults. Rendering a class to an HTTP status is left to the caller.

use std::path::PathBuf;

use thiserror::Error;

use crate::middleware::AuthFailure;

/// Coarse classification of an error for response rendering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The caller is not authenticated or not authorized (401).
    Unauthorized,
    /// Caller-supplied structural input is malformed (400).
    BadRequest,
    /// The service itself is misconfigured (500).
    Internal,
}

/// Structural validation failure raised by a [`Validator`](crate::validation::Validator).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    /// The value is not of the expected JSON type.
    #[error("{field} must be {expected}")]
    WrongType {
        /// Field (or `value` for the root) that failed.
        field: String,
        /// Human readable expected type.
        expected: &'static str,
    },

    /// The value is present but empty.
    #[error("{field} must not be empty")]
    Empty {
        /// Field (or `value` for the root) that failed.
        field: String,
    },

    /// The value does not have the expected shape.
    #[error("{field} has an invalid format: {reason}")]
    Format {
        /// Field (or `value` for the root) that failed.
        field: String,
        /// What is wrong with it.
        reason: &'static str,
    },
}

impl ValidationError {
    /// Creates a [`ValidationError::WrongType`].
    pub fn wrong_type(field: impl Into<String>, expected: &'static str) -> Self {
        Self::WrongType { field: field.into(), expected }
    }

    /// Creates a [`ValidationError::Empty`].
    pub fn empty(field: impl Into<String>) -> Self {
        Self::Empty { field: field.into() }
    }

    /// Creates a [`ValidationError::Format`].
    pub fn format(field: impl Into<String>, reason: &'static str) -> Self {
        Self::Format { field: field.into(), reason }
    }
}

/// Internal reason a token failed verification.
///
/// Never shown to the caller; only logged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum VerifyDiagnostic {
    /// Header segment could not be decoded.
    MalformedHeader,
    /// Header carries no `kid`.
    MissingKid,
    /// `kid` is not in the key set.
    UnknownKey,
    /// Header or key algorithm differs from the pinned algorithm.
    AlgorithmMismatch,
    /// Signature does not verify.
    InvalidSignature,
    /// `exp` is in the past.
    Expired,
    /// `nbf` is in the future.
    NotYetValid,
    /// Payload is not a JSON object or a required claim is missing.
    MalformedClaims,
    /// The key's material cannot be used for this operation.
    UnusableKey,
}

impl VerifyDiagnostic {
    /// Stable snake_case code for structured logs.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::MalformedHeader => "malformed_header",
            Self::MissingKid => "missing_kid",
            Self::UnknownKey => "unknown_key",
            Self::AlgorithmMismatch => "algorithm_mismatch",
            Self::InvalidSignature => "invalid_signature",
            Self::Expired => "expired",
            Self::NotYetValid => "not_yet_valid",
            Self::MalformedClaims => "malformed_claims",
            Self::UnusableKey => "unusable_key",
        }
    }
}

impl std::fmt::Display for VerifyDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl From<jsonwebtoken::errors::Error> for VerifyDiagnostic {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Utf8(_) => {
                Self::MalformedHeader
            },
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::ImmatureSignature => Self::NotYetValid,
            ErrorKind::InvalidAlgorithm => Self::AlgorithmMismatch,
            ErrorKind::InvalidKeyFormat | ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidEcdsaKey => {
                Self::UnusableKey
            },
            _ => Self::MalformedClaims,
        }
    }
}

/// Uniform token verification failure.
///
/// The display text is identical for every cause so responses never reveal
/// which verification step failed. Use [`diagnostic`](Self::diagnostic) for logs.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("Invalid token")]
pub struct InvalidToken {
    diagnostic: VerifyDiagnostic,
}

impl InvalidToken {
    /// Wraps a diagnostic code.
    #[must_use]
    pub fn new(diagnostic: VerifyDiagnostic) -> Self {
        Self { diagnostic }
    }

    /// The internal reason for the failure.
    #[must_use]
    pub fn diagnostic(&self) -> VerifyDiagnostic {
        self.diagnostic
    }
}

impl From<VerifyDiagnostic> for InvalidToken {
    fn from(diagnostic: VerifyDiagnostic) -> Self {
        Self::new(diagnostic)
    }
}

impl From<jsonwebtoken::errors::Error> for InvalidToken {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::new(err.into())
    }
}

/// Key set loading and selection errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KeySetError {
    /// The key file does not exist.
    #[error("Key file not found: {}", path.display())]
    FileNotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// The key file exists but could not be read.
    #[error("Failed to read key file: {}", path.display())]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid JSON.
    #[error("Failed to parse key document: {0}")]
    Parse(#[source] serde_json::Error),

    /// The document is not shaped as `{"keys": [...]}` with a non-empty array.
    #[error("Invalid key document: {0}")]
    Shape(&'static str),

    /// A JWK entry failed structural validation.
    #[error("Invalid JWK entry at index {index}: {source}")]
    InvalidJwk {
        /// Position of the entry in the `keys` array.
        index: usize,
        /// The validation failure.
        #[source]
        source: ValidationError,
    },

    /// Two keys share a `kid`.
    #[error("Duplicate key id: {kid}")]
    DuplicateKid {
        /// The repeated key id.
        kid: String,
    },

    /// Key material cannot be converted into a usable key.
    #[error("Unusable key material for {kid}: {reason}")]
    UnusableKey {
        /// Key id of the offending key.
        kid: String,
        /// Why it is unusable.
        reason: String,
    },

    /// No key carries a usable expiry for signing.
    #[error("No signing key with a usable expiry")]
    NoSigningKey,

    /// No key set has been published yet.
    #[error("Key set not published")]
    Unpublished,
}

impl KeySetError {
    /// Creates a [`KeySetError::UnusableKey`].
    pub fn unusable_key(kid: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnusableKey { kid: kid.into(), reason: reason.into() }
    }

    /// Classification for response rendering.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Shape(_) | Self::InvalidJwk { .. } => ErrorClass::BadRequest,
            _ => ErrorClass::Internal,
        }
    }
}

/// Errors raised to route handlers by the authorizer and the token issuer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// The request carries no verified token.
    #[error(transparent)]
    Unauthenticated(AuthFailure),

    /// The token is valid but none of its roles match.
    #[error("Not authorized")]
    NotAuthorized,

    /// A role group name is not in the recognized registry.
    #[error("Unknown role group: {0}")]
    UnknownRoleGroup(String),

    /// A required namespaced claim is missing or has the wrong shape.
    #[error("Missing \"{0}\" claim")]
    MissingClaim(String),

    /// Key set failure.
    #[error(transparent)]
    KeySet(#[from] KeySetError),

    /// Token verification failure.
    #[error(transparent)]
    InvalidToken(#[from] InvalidToken),

    /// Signing a token failed.
    #[error("Failed to sign token: {0}")]
    Signing(String),

    /// Configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl AuthError {
    /// Creates an [`AuthError::MissingClaim`].
    pub fn missing_claim(claim: impl Into<String>) -> Self {
        Self::MissingClaim(claim.into())
    }

    /// Creates an [`AuthError::UnknownRoleGroup`].
    pub fn unknown_role_group(name: impl Into<String>) -> Self {
        Self::UnknownRoleGroup(name.into())
    }

    /// Creates an [`AuthError::Signing`].
    pub fn signing(message: impl Into<String>) -> Self {
        Self::Signing(message.into())
    }

    /// Creates an [`AuthError::Config`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Classification for response rendering.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Unauthenticated(failure) => failure.class(),
            Self::NotAuthorized | Self::MissingClaim(_) | Self::InvalidToken(_) => {
                ErrorClass::Unauthorized
            },
            Self::KeySet(err) => err.class(),
            Self::UnknownRoleGroup(_) | Self::Signing(_) | Self::Config(_) => ErrorClass::Internal,
        }
    }
}

impl From<AuthFailure> for AuthError {
    fn from(failure: AuthFailure) -> Self {
        Self::Unauthenticated(failure)
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthError::missing_claim("user_metadata");
        assert_eq!(err.to_string(), "Missing \"user_metadata\" claim");

        let err = AuthError::NotAuthorized;
        assert_eq!(err.to_string(), "Not authorized");

        let err = AuthError::unknown_role_group("wizard");
        assert_eq!(err.to_string(), "Unknown role group: wizard");
    }

    #[test]
    fn test_invalid_token_display_is_uniform() {
        for diagnostic in [
            VerifyDiagnostic::UnknownKey,
            VerifyDiagnostic::InvalidSignature,
            VerifyDiagnostic::AlgorithmMismatch,
            VerifyDiagnostic::Expired,
        ] {
            let err = InvalidToken::new(diagnostic);
            assert_eq!(err.to_string(), "Invalid token");
            assert_eq!(err.diagnostic(), diagnostic);
        }
    }

    #[test]
    fn test_diagnostic_from_jsonwebtoken() {
        use jsonwebtoken::errors::{Error, ErrorKind};

        let diag: VerifyDiagnostic = Error::from(ErrorKind::ExpiredSignature).into();
        assert_eq!(diag, VerifyDiagnostic::Expired);

        let diag: VerifyDiagnostic = Error::from(ErrorKind::InvalidSignature).into();
        assert_eq!(diag, VerifyDiagnostic::InvalidSignature);

        let diag: VerifyDiagnostic = Error::from(ErrorKind::InvalidAlgorithm).into();
        assert_eq!(diag, VerifyDiagnostic::AlgorithmMismatch);
    }

    #[test]
    fn test_key_set_error_classes() {
        assert_eq!(KeySetError::Shape("keys must not be empty").class(), ErrorClass::BadRequest);
        let err = KeySetError::InvalidJwk { index: 0, source: ValidationError::empty("kid") };
        assert_eq!(err.class(), ErrorClass::BadRequest);
        assert_eq!(err.to_string(), "Invalid JWK entry at index 0: kid must not be empty");
        assert_eq!(KeySetError::NoSigningKey.class(), ErrorClass::Internal);
        assert_eq!(KeySetError::Unpublished.class(), ErrorClass::Internal);
        assert_eq!(KeySetError::Unpublished.to_string(), "Key set not published");
        let err = KeySetError::FileNotFound { path: PathBuf::from("/nope.json") };
        assert_eq!(err.class(), ErrorClass::Internal);
    }

    #[test]
    fn test_auth_error_classes() {
        assert_eq!(AuthError::NotAuthorized.class(), ErrorClass::Unauthorized);
        assert_eq!(AuthError::unknown_role_group("x").class(), ErrorClass::Internal);
        assert_eq!(
            AuthError::from(AuthFailure::KeySetUnavailable).class(),
            ErrorClass::Internal
        );
        assert_eq!(AuthError::from(AuthFailure::MissingHeader).class(), ErrorClass::Unauthorized);
        assert_eq!(
            AuthError::from(InvalidToken::new(VerifyDiagnostic::UnknownKey)).class(),
            ErrorClass::Unauthorized
        );
    }

    #[test]
    fn test_key_set_error_preserves_source_chain() {
        use std::error::Error;

        let err = KeySetError::Read {
            path: PathBuf::from("/keys/jwks.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.to_string(), "Failed to read key file: /keys/jwks.json");
        let source = err.source().expect("source exists");
        assert_eq!(source.to_string(), "denied");
    }
}
