//! Configuration and assembly.
//!
//! [`AuthConfig`] describes one deployment: where the key documents live,
//! which algorithms each trust boundary pins, the accepted bearer schemes, the
//! claim namespace and the role groups. [`AuthStack::from_config`] turns it
//! into a ready [`Authenticator`], [`Authorizer`] and [`TokenIssuer`].

use std::{fmt, path::PathBuf, time::Duration};

use rand_core::{OsRng, RngCore};
use serde::Deserialize;
use serde_json::Value;
use zeroize::Zeroizing;

use crate::{
    authorizer::{Authorizer, RoleGroups},
    error::{AuthError, Result},
    issuer::{DEFAULT_TOKEN_LIFETIME, TokenIssuer},
    key_set::{Key, KeySet, SharedKeySet},
    middleware::Authenticator,
    validation::{TrustBoundary, validate_algorithm},
};

/// Default location of the external JWK document.
pub const DEFAULT_JWKS_PATH: &str = "/keys/jwks.json";

/// Default bearer scheme.
pub const DEFAULT_BEARER: &str = "Bearer";

/// Key id of the generated development signing key.
pub const DEV_INTERNAL_KID: &str = "adb1ce7a-0257-4c5e-bb6d-de7819582621";

const DEV_SECRET_LEN: usize = 32;
/// Expiry of the generated development key. It never lapses while the
/// process runs, so `issue` always finds it as the newest key.
const DEV_KEY_EXPIRY: i64 = i64::MAX;

/// Deployment environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum Environment {
    /// Production: every key document must load.
    Production,
    /// Development: an internal signing key is generated when none is configured.
    #[default]
    Development,
}

impl Environment {
    /// Classifies an environment name. Any name containing `prod`, in any
    /// case, is production.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name.to_ascii_lowercase().contains("prod") { Self::Production } else { Self::Development }
    }

    /// Whether this is production.
    #[must_use]
    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

impl From<String> for Environment {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => f.write_str("production"),
            Self::Development => f.write_str("development"),
        }
    }
}

/// Authentication configuration.
///
/// # Example
///
/// ```no_run
/// use tokengate_authn::config::AuthConfig;
///
/// let config = AuthConfig::builder()
///     .claim_namespace("https://example.com")
///     .issuer("my-service")
///     .jwks_path("/etc/keys/jwks.json")
///     .build()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Deployment environment.
    #[serde(default)]
    pub(crate) environment: Environment,

    /// Prefix of namespaced claims.
    pub(crate) claim_namespace: String,

    /// `iss` of internally issued tokens.
    pub(crate) issuer: String,

    /// Accepted bearer schemes, matched case-sensitively.
    #[serde(default = "default_allowed_bearers")]
    pub(crate) allowed_bearers: Vec<String>,

    /// External JWK document.
    #[serde(default = "default_jwks_path")]
    pub(crate) jwks_path: PathBuf,

    /// Internal JWK document.
    #[serde(default)]
    pub(crate) internal_jwks_path: Option<PathBuf>,

    /// Algorithm pinned for external tokens.
    #[serde(default = "default_external_algorithm")]
    pub(crate) external_algorithm: String,

    /// Algorithm pinned for internal tokens.
    #[serde(default = "default_internal_algorithm")]
    pub(crate) internal_algorithm: String,

    /// Lifetime of internally issued tokens.
    #[serde(with = "humantime_serde", default = "default_token_lifetime")]
    pub(crate) token_lifetime: Duration,

    /// Role group registry.
    #[serde(default)]
    pub(crate) role_groups: RoleGroups,
}

fn default_allowed_bearers() -> Vec<String> {
    vec![DEFAULT_BEARER.to_owned()]
}

fn default_jwks_path() -> PathBuf {
    PathBuf::from(DEFAULT_JWKS_PATH)
}

fn default_external_algorithm() -> String {
    "RS256".to_owned()
}

fn default_internal_algorithm() -> String {
    "HS256".to_owned()
}

fn default_token_lifetime() -> Duration {
    DEFAULT_TOKEN_LIFETIME
}

#[bon::bon]
impl AuthConfig {
    /// Creates a new configuration, validating all fields.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if:
    /// - `claim_namespace` or `issuer` is empty
    /// - no bearer scheme is allowed, or one is blank or contains whitespace
    /// - an algorithm is not accepted on its boundary
    /// - `token_lifetime` is zero
    #[builder]
    pub fn new(
        #[builder(default)] environment: Environment,
        #[builder(into)] claim_namespace: String,
        #[builder(into)] issuer: String,
        #[builder(default = default_allowed_bearers())] allowed_bearers: Vec<String>,
        #[builder(into, default = default_jwks_path())] jwks_path: PathBuf,
        #[builder(into)] internal_jwks_path: Option<PathBuf>,
        #[builder(into, default = default_external_algorithm())] external_algorithm: String,
        #[builder(into, default = default_internal_algorithm())] internal_algorithm: String,
        #[builder(default = DEFAULT_TOKEN_LIFETIME)] token_lifetime: Duration,
        #[builder(default)] role_groups: RoleGroups,
    ) -> Result<Self> {
        let config = Self {
            environment,
            claim_namespace,
            issuer,
            allowed_bearers,
            jwks_path,
            internal_jwks_path,
            external_algorithm,
            internal_algorithm,
            token_lifetime,
            role_groups,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reads the configuration from process environment variables.
    ///
    /// | Variable | Field | Default |
    /// |---|---|---|
    /// | `ENV` | `environment` | development |
    /// | `CUSTOM_TOKEN_NAMESPACE` | `claim_namespace` | required |
    /// | `JWT_ISSUER` | `issuer` | required |
    /// | `JWK_PATH` | `jwks_path` | `/keys/jwks.json` |
    /// | `INTERNAL_JWK_PATH` | `internal_jwks_path` | none |
    /// | `AUTH_ALLOWED_BEARERS` | `allowed_bearers` (comma separated) | `Bearer` |
    /// | `JWT_EXTERNAL_ALGORITHM` | `external_algorithm` | `RS256` |
    /// | `JWT_INTERNAL_ALGORITHM` | `internal_algorithm` | `HS256` |
    /// | `JWT_TOKEN_LIFETIME` | `token_lifetime` (humantime) | `24h` |
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if a required variable is missing or a
    /// value is invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| AuthError::config(format!("{name} is not set")))
        };

        let token_lifetime: Duration = match lookup("JWT_TOKEN_LIFETIME") {
            Some(raw) => humantime_serde::deserialize(Value::String(raw))
                .map_err(|err| AuthError::config(format!("JWT_TOKEN_LIFETIME: {err}")))?,
            None => DEFAULT_TOKEN_LIFETIME,
        };

        let allowed_bearers = match lookup("AUTH_ALLOWED_BEARERS") {
            Some(raw) => raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect(),
            None => default_allowed_bearers(),
        };

        Self::builder()
            .environment(lookup("ENV").map(Environment::from).unwrap_or_default())
            .claim_namespace(required("CUSTOM_TOKEN_NAMESPACE")?)
            .issuer(required("JWT_ISSUER")?)
            .allowed_bearers(allowed_bearers)
            .jwks_path(lookup("JWK_PATH").map_or_else(default_jwks_path, PathBuf::from))
            .maybe_internal_jwks_path(lookup("INTERNAL_JWK_PATH").map(PathBuf::from))
            .external_algorithm(lookup("JWT_EXTERNAL_ALGORITHM").unwrap_or_else(default_external_algorithm))
            .internal_algorithm(lookup("JWT_INTERNAL_ALGORITHM").unwrap_or_else(default_internal_algorithm))
            .token_lifetime(token_lifetime)
            .build()
    }

    /// Checks field invariants. Deserialized configurations should be
    /// validated before use; [`AuthStack::from_config`] does so.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn validate(&self) -> Result<()> {
        if self.claim_namespace.trim().is_empty() {
            return Err(AuthError::config("claim_namespace cannot be empty"));
        }
        if self.issuer.trim().is_empty() {
            return Err(AuthError::config("issuer cannot be empty"));
        }
        if self.allowed_bearers.is_empty() {
            return Err(AuthError::config("at least one bearer scheme is required"));
        }
        if self.allowed_bearers.iter().any(|b| b.is_empty() || b.contains(char::is_whitespace)) {
            return Err(AuthError::config("bearer schemes must be non-empty and free of whitespace"));
        }
        if self.token_lifetime.is_zero() {
            return Err(AuthError::config("token_lifetime must be positive"));
        }
        validate_algorithm(&self.external_algorithm, TrustBoundary::External)?;
        validate_algorithm(&self.internal_algorithm, TrustBoundary::Internal)?;
        Ok(())
    }

    /// Returns the environment.
    #[must_use]
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Returns the claim namespace.
    #[must_use]
    pub fn claim_namespace(&self) -> &str {
        &self.claim_namespace
    }

    /// Returns the internal token issuer name.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the accepted bearer schemes.
    #[must_use]
    pub fn allowed_bearers(&self) -> &[String] {
        &self.allowed_bearers
    }

    /// Returns the token lifetime.
    #[must_use]
    pub fn token_lifetime(&self) -> Duration {
        self.token_lifetime
    }

    /// Returns the role groups.
    #[must_use]
    pub fn role_groups(&self) -> &RoleGroups {
        &self.role_groups
    }
}

/// The assembled authentication components of one service.
#[derive(Clone, Debug)]
pub struct AuthStack {
    /// Authenticates requests against the external key set.
    pub authenticator: Authenticator,
    /// Answers role questions.
    pub authorizer: Authorizer,
    /// Issues and verifies internal tokens.
    pub issuer: TokenIssuer,
}

impl AuthStack {
    /// Validates `config`, loads both key sets and assembles the components.
    ///
    /// In production both key documents must load. In development a failed
    /// external load leaves the external key set unavailable, and a missing
    /// internal document is replaced by a generated signing key that stays
    /// valid for the life of the process.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Config`] for invalid configuration, or a production
    ///   configuration without `internal_jwks_path`
    /// - [`AuthError::KeySet`] if a required key document fails to load
    #[tracing::instrument(skip(config), fields(environment = %config.environment))]
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        config.validate()?;
        let external_algorithm = validate_algorithm(&config.external_algorithm, TrustBoundary::External)?;
        let internal_algorithm = validate_algorithm(&config.internal_algorithm, TrustBoundary::Internal)?;
        let production = config.environment.is_production();

        let external = SharedKeySet::unavailable();
        if let Err(err) = external.load_path(&config.jwks_path) {
            if production {
                return Err(err.into());
            }
            tracing::warn!(
                path = %config.jwks_path.display(),
                error = %err,
                "external key set unavailable"
            );
        }

        let internal = SharedKeySet::unavailable();
        match &config.internal_jwks_path {
            Some(path) => {
                internal.load_path(path)?;
            },
            None if production => {
                return Err(AuthError::config("internal_jwks_path is required in production"));
            },
            None => {
                internal.replace(development_key_set(internal_algorithm)?);
                tracing::info!(kid = DEV_INTERNAL_KID, "using generated development signing key");
            },
        }

        Ok(Self {
            authenticator: Authenticator::new(external, config.allowed_bearers.iter().cloned(), external_algorithm),
            authorizer: Authorizer::new(config.claim_namespace.as_str(), config.role_groups.clone()),
            issuer: TokenIssuer::builder()
                .keys(internal)
                .issuer(config.issuer.as_str())
                .algorithm(internal_algorithm)
                .lifetime(config.token_lifetime)
                .build(),
        })
    }
}

fn development_key_set(algorithm: jsonwebtoken::Algorithm) -> Result<KeySet> {
    let mut secret = Zeroizing::new([0u8; DEV_SECRET_LEN]);
    OsRng.fill_bytes(&mut secret[..]);

    let key = Key::symmetric(DEV_INTERNAL_KID, algorithm, &secret[..])?.with_expiry(DEV_KEY_EXPIRY);

    let mut set = KeySet::new();
    set.add(key)?;
    Ok(set)
}
