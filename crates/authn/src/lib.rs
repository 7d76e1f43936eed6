//! # Tokengate Authentication
//!
//! Bearer token authentication and role-claim authorization for HTTP services.
//!
//! This crate provides:
//! - **Key sets**: JWK documents loaded into immutable, atomically swapped key sets
//! - **Authentication**: `Authorization` header parsing and token verification,
//!   producing a per-request outcome instead of rejecting the request
//! - **Authorization**: role groups expanded and matched against a namespaced
//!   `roles` claim
//! - **Internal tokens**: issuance and verification with the newest internal key
//!
//! ## Security
//!
//! - Every trust boundary pins one algorithm; `none` is always rejected
//! - External tokens must use asymmetric algorithms (RS256/RS384/RS512, EdDSA)
//! - Verification failures are uniform to callers; the reason is only logged
//!
//! ## Example
//!
//! ```no_run
//! use tokengate_authn::{AuthConfig, AuthOutcome, AuthStack, RoleGroup};
//!
//! # fn example(headers: &http::HeaderMap) -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthConfig::from_env()?;
//! let stack = AuthStack::from_config(&config)?;
//!
//! let outcome: AuthOutcome = stack.authenticator.authenticate_headers(headers);
//! stack.authorizer.authorize_to_role(&outcome, RoleGroup::Admin)?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Role-claim authorization.
pub mod authorizer;
/// Configuration and assembly.
pub mod config;
/// Authentication error types.
pub mod error;
/// Internal token issuance.
pub mod issuer;
/// Token verification and claims.
pub mod jwt;
/// JWK key sets.
pub mod key_set;
/// Tower layer.
#[cfg(feature = "layer")]
pub mod layer;
/// Request authentication.
pub mod middleware;
/// Shared test utilities.
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::unwrap_used)]
pub mod testutil;
/// Structural validators and algorithm policy.
pub mod validation;

// Re-export key types for convenience
pub use authorizer::{Authorizer, RoleGroup, RoleGroups};
pub use config::{AuthConfig, AuthStack, Environment};
pub use error::{AuthError, ErrorClass, InvalidToken, KeySetError, Result};
pub use issuer::TokenIssuer;
pub use jwt::{ClaimSet, TokenVerifier};
pub use key_set::{Key, KeySet, SharedKeySet};
#[cfg(feature = "layer")]
pub use layer::{AuthLayer, AuthService};
pub use middleware::{AuthFailure, AuthOutcome, Authenticator};
pub use validation::{FORBIDDEN_ALGORITHMS, MAX_TOKEN_LENGTH, TrustBoundary, validate_algorithm};
