//! Internal token issuance.
//!
//! [`TokenIssuer`] mints tokens for service-to-service calls. It signs with
//! the newest key (by `exp`) of the internal key set and verifies against the
//! same set under the same pinned algorithm.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use jsonwebtoken::Header;
use serde_json::{Map, Value};

use crate::{
    error::{AuthError, KeySetError, Result},
    jwt::{ClaimSet, TokenVerifier},
    key_set::SharedKeySet,
};

/// Default token lifetime when no explicit expiry is requested.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Issues and verifies internal tokens.
#[derive(Clone, Debug)]
pub struct TokenIssuer {
    keys: SharedKeySet,
    issuer: Arc<str>,
    lifetime: Duration,
    verifier: TokenVerifier,
}

#[bon::bon]
impl TokenIssuer {
    /// Creates an issuer.
    ///
    /// The pinned algorithm must match the algorithm of the internal keys.
    #[builder]
    pub fn new(
        keys: SharedKeySet,
        #[builder(into)] issuer: Arc<str>,
        algorithm: jsonwebtoken::Algorithm,
        #[builder(default = DEFAULT_TOKEN_LIFETIME)] lifetime: Duration,
    ) -> Self {
        Self { keys, issuer, lifetime, verifier: TokenVerifier::new(algorithm) }
    }

    /// The `iss` written into issued tokens.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// The internal key set.
    #[must_use]
    pub fn key_set(&self) -> &SharedKeySet {
        &self.keys
    }

    /// Issues a token carrying `claims`.
    ///
    /// `exp` defaults to now plus the configured lifetime. `exp` and `iss`
    /// override any caller-supplied values of the same name.
    ///
    /// # Errors
    ///
    /// - [`KeySetError::Unpublished`] if no internal key set is published
    /// - [`KeySetError::NoSigningKey`] if no internal key carries an `exp`, or
    ///   the newest one has already expired
    /// - [`KeySetError::UnusableKey`] if the newest key cannot sign or is bound
    ///   to a different algorithm
    /// - [`AuthError::Signing`] if encoding fails
    #[tracing::instrument(skip(self, claims), fields(iss = %self.issuer))]
    pub fn issue(&self, claims: Map<String, Value>, exp: Option<i64>) -> Result<String> {
        let keys = self.keys.snapshot().ok_or(KeySetError::Unpublished)?;
        let now = Utc::now().timestamp();
        let key = keys
            .newest_by_expiry()
            .filter(|key| key.expiry().is_some_and(|key_exp| key_exp > now))
            .ok_or(KeySetError::NoSigningKey)?;

        if key.algorithm() != self.verifier.algorithm() {
            return Err(KeySetError::unusable_key(
                key.kid(),
                format!("key is bound to {:?}, issuer signs with {:?}", key.algorithm(), self.verifier.algorithm()),
            )
            .into());
        }
        let encoding_key = key
            .encoding_key()
            .ok_or_else(|| KeySetError::unusable_key(key.kid(), "key cannot sign"))?;

        let lifetime = i64::try_from(self.lifetime.as_secs()).unwrap_or(i64::MAX);
        let mut payload = claims;
        payload.insert("exp".to_owned(), Value::from(exp.unwrap_or(now.saturating_add(lifetime))));
        payload.insert("iss".to_owned(), Value::from(&*self.issuer));

        let mut header = Header::new(self.verifier.algorithm());
        header.kid = Some(key.kid().to_owned());

        let token = jsonwebtoken::encode(&header, &payload, encoding_key)
            .map_err(|err| AuthError::signing(err.to_string()))?;
        tracing::debug!(kid = %key.kid(), "internal token issued");
        Ok(token)
    }

    /// Verifies an internal token.
    ///
    /// # Errors
    ///
    /// - [`AuthError::KeySet`] if no internal key set is published
    /// - [`AuthError::InvalidToken`] if verification fails
    pub fn verify(&self, token: &str) -> Result<ClaimSet> {
        let keys = self.keys.snapshot().ok_or(KeySetError::Unpublished)?;
        Ok(self.verifier.verify(token, &keys)?)
    }
}
