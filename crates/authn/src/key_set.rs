//! Key sets for token verification and signing.
//!
//! A [`KeySet`] maps key ids (`kid`) to [`Key`]s. It is built once, either
//! programmatically or from a JWK document shaped as `{"keys": [...]}`, and is
//! read-only afterwards.
//!
//! [`SharedKeySet`] publishes a key set to concurrent readers. Readers take a
//! lock-free snapshot; a reload builds a complete new set off to the side and
//! publishes it with a single pointer swap, so no reader ever observes a
//! partially populated set and a failed reload leaves the previous set live.
//!
//! ```text
//! JWK document → shape check → JwkValidator per entry → Key per entry
//!              → local KeySet → swap into SharedKeySet
//! ```

use std::{collections::HashMap, fmt, path::Path, sync::Arc};

use arc_swap::ArcSwapOption;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use fail::fail_point;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use serde::Deserialize;
use serde_json::Value;
use zeroize::Zeroizing;

use crate::{
    error::KeySetError,
    validation::{JwkValidator, Validator},
};

/// Algorithm-specific key parameters.
#[derive(Clone)]
pub enum KeyMaterial {
    /// RSA public key (base64url modulus and exponent).
    Rsa {
        /// Modulus.
        n: String,
        /// Public exponent.
        e: String,
    },
    /// Ed25519 public key (base64url `x` coordinate).
    Ed25519 {
        /// Public key bytes, base64url encoded.
        x: String,
    },
    /// Shared HMAC secret.
    Symmetric {
        /// Raw secret bytes.
        secret: Zeroizing<Vec<u8>>,
    },
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rsa { .. } => f.write_str("Rsa"),
            Self::Ed25519 { .. } => f.write_str("Ed25519"),
            Self::Symmetric { .. } => f.write_str("Symmetric"),
        }
    }
}

/// A single verification (and possibly signing) key.
///
/// Immutable once constructed.
#[derive(Clone)]
pub struct Key {
    kid: String,
    alg: Algorithm,
    material: KeyMaterial,
    exp: Option<i64>,
    decoding: DecodingKey,
    encoding: Option<EncodingKey>,
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("kid", &self.kid)
            .field("alg", &self.alg)
            .field("material", &self.material)
            .field("exp", &self.exp)
            .finish_non_exhaustive()
    }
}

impl Key {
    /// Creates an RSA verification key from base64url modulus and exponent.
    ///
    /// # Errors
    ///
    /// Returns [`KeySetError::UnusableKey`] if `alg` is not an RSA algorithm or
    /// the components cannot be decoded.
    pub fn rsa(
        kid: impl Into<String>,
        alg: Algorithm,
        n: impl Into<String>,
        e: impl Into<String>,
    ) -> Result<Self, KeySetError> {
        let kid = kid.into();
        let (n, e) = (n.into(), e.into());
        if !matches!(alg, Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512) {
            return Err(KeySetError::unusable_key(kid, format!("{alg:?} is not an RSA algorithm")));
        }
        let decoding = DecodingKey::from_rsa_components(&n, &e)
            .map_err(|err| KeySetError::unusable_key(&kid, err.to_string()))?;
        Ok(Self { kid, alg, material: KeyMaterial::Rsa { n, e }, exp: None, decoding, encoding: None })
    }

    /// Creates an Ed25519 verification key from its base64url public key.
    ///
    /// # Errors
    ///
    /// Returns [`KeySetError::UnusableKey`] if `x` cannot be decoded.
    pub fn ed25519(kid: impl Into<String>, x: impl Into<String>) -> Result<Self, KeySetError> {
        let kid = kid.into();
        let x = x.into();
        let decoding = DecodingKey::from_ed_components(&x)
            .map_err(|err| KeySetError::unusable_key(&kid, err.to_string()))?;
        Ok(Self {
            kid,
            alg: Algorithm::EdDSA,
            material: KeyMaterial::Ed25519 { x },
            exp: None,
            decoding,
            encoding: None,
        })
    }

    /// Creates an HMAC key that can both sign and verify.
    ///
    /// # Errors
    ///
    /// Returns [`KeySetError::UnusableKey`] if `alg` is not an HMAC algorithm
    /// or the secret is empty.
    pub fn symmetric(
        kid: impl Into<String>,
        alg: Algorithm,
        secret: &[u8],
    ) -> Result<Self, KeySetError> {
        let kid = kid.into();
        if !matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(KeySetError::unusable_key(kid, format!("{alg:?} is not an HMAC algorithm")));
        }
        if secret.is_empty() {
            return Err(KeySetError::unusable_key(kid, "secret is empty"));
        }
        Ok(Self {
            kid,
            alg,
            decoding: DecodingKey::from_secret(secret),
            encoding: Some(EncodingKey::from_secret(secret)),
            material: KeyMaterial::Symmetric { secret: Zeroizing::new(secret.to_vec()) },
            exp: None,
        })
    }

    /// Returns this key with an expiry (seconds since epoch).
    #[must_use]
    pub fn with_expiry(mut self, exp: i64) -> Self {
        self.exp = Some(exp);
        self
    }

    /// Key id.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Algorithm this key is bound to.
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.alg
    }

    /// Key parameters.
    #[must_use]
    pub fn material(&self) -> &KeyMaterial {
        &self.material
    }

    /// Expiry (seconds since epoch), if any.
    #[must_use]
    pub fn expiry(&self) -> Option<i64> {
        self.exp
    }

    /// Key used to verify signatures.
    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }

    /// Key used to sign, for symmetric keys only.
    #[must_use]
    pub fn encoding_key(&self) -> Option<&EncodingKey> {
        self.encoding.as_ref()
    }

    /// Converts a structurally valid JWK entry into a key.
    ///
    /// Returns `Ok(None)` for entries that carry no `kid`, no key material, or
    /// an unsupported `kty`; those are skipped by the loader.
    ///
    /// # Errors
    ///
    /// Returns [`KeySetError::UnusableKey`] if material is present but cannot
    /// be used (bad encoding, algorithm inconsistent with `kty`).
    pub fn from_jwk(entry: &Value) -> Result<Option<Self>, KeySetError> {
        let jwk: Jwk = match serde_json::from_value(entry.clone()) {
            Ok(jwk) => jwk,
            Err(err) => {
                let kid = entry.get("kid").and_then(Value::as_str).unwrap_or("<none>");
                return Err(KeySetError::unusable_key(kid, err.to_string()));
            },
        };

        let Some(kid) = jwk.kid else {
            tracing::warn!(kty = ?jwk.kty, "skipping JWK entry without kid");
            return Ok(None);
        };

        let alg = match jwk.alg.as_deref().or_else(|| default_alg(jwk.kty.as_deref())) {
            Some(name) => name
                .parse::<Algorithm>()
                .map_err(|_| KeySetError::unusable_key(&kid, format!("unknown algorithm '{name}'")))?,
            None => {
                tracing::warn!(kid = %kid, kty = ?jwk.kty, "skipping JWK entry with unsupported key type");
                return Ok(None);
            },
        };

        let key = match (jwk.kty.as_deref(), jwk.n, jwk.e, jwk.x, jwk.k) {
            (Some("RSA") | None, Some(n), Some(e), _, _) => Self::rsa(kid, alg, n, e)?,
            (Some("OKP") | None, _, _, Some(x), _) => {
                if alg != Algorithm::EdDSA {
                    return Err(KeySetError::unusable_key(kid, "OKP keys require EdDSA"));
                }
                Self::ed25519(kid, x)?
            },
            (Some("oct") | None, _, _, _, Some(k)) => {
                let secret = Zeroizing::new(
                    URL_SAFE_NO_PAD
                        .decode(k.trim_end_matches('='))
                        .map_err(|err| KeySetError::unusable_key(&kid, err.to_string()))?,
                );
                Self::symmetric(kid, alg, &secret)?
            },
            (kty, ..) => {
                tracing::warn!(kid = %kid, kty = ?kty, "skipping JWK entry without usable key material");
                return Ok(None);
            },
        };

        Ok(Some(match jwk.exp.as_ref().and_then(numeric_expiry) {
            Some(exp) => key.with_expiry(exp),
            None => key,
        }))
    }
}

/// The members of a JWK entry this crate reads.
#[derive(Deserialize)]
struct Jwk {
    kty: Option<String>,
    alg: Option<String>,
    kid: Option<String>,
    n: Option<String>,
    e: Option<String>,
    x: Option<String>,
    k: Option<String>,
    exp: Option<Value>,
}

fn default_alg(kty: Option<&str>) -> Option<&'static str> {
    match kty {
        Some("RSA") => Some("RS256"),
        Some("oct") => Some("HS256"),
        Some("OKP") => Some("EdDSA"),
        _ => None,
    }
}

/// Accepts integer, float and numeric-string expiries.
fn numeric_expiry(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// An immutable collection of keys indexed by `kid`.
///
/// Insertion order is kept for "first match" scans such as
/// [`newest_by_expiry`](Self::newest_by_expiry).
#[derive(Clone, Debug, Default)]
pub struct KeySet {
    keys: Vec<Arc<Key>>,
    index: HashMap<String, usize>,
}

impl KeySet {
    /// Creates an empty key set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key.
    ///
    /// # Errors
    ///
    /// Returns [`KeySetError::DuplicateKid`] if the `kid` is already present.
    pub fn add(&mut self, key: Key) -> Result<(), KeySetError> {
        if self.index.contains_key(key.kid()) {
            return Err(KeySetError::DuplicateKid { kid: key.kid().to_owned() });
        }
        self.index.insert(key.kid().to_owned(), self.keys.len());
        self.keys.push(Arc::new(key));
        Ok(())
    }

    /// Looks up a key by id.
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<&Arc<Key>> {
        self.index.get(kid).map(|&i| &self.keys[i])
    }

    /// Returns the key with the greatest expiry.
    ///
    /// Keys without an expiry are ignored; ties go to the first key inserted.
    #[must_use]
    pub fn newest_by_expiry(&self) -> Option<&Arc<Key>> {
        let mut newest: Option<(&Arc<Key>, i64)> = None;
        for key in &self.keys {
            if let Some(exp) = key.expiry()
                && newest.is_none_or(|(_, best)| exp > best)
            {
                newest = Some((key, exp));
            }
        }
        newest.map(|(key, _)| key)
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Iterates keys in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Key>> {
        self.keys.iter()
    }

    /// Builds a key set from a raw JWK document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not JSON, is not shaped as
    /// `{"keys": [...]}` with a non-empty array, an entry fails
    /// [`JwkValidator`], an entry's material is unusable, or two entries share
    /// a `kid`.
    pub fn from_jwk_document(raw: &str) -> Result<Self, KeySetError> {
        let document: Value = serde_json::from_str(raw).map_err(KeySetError::Parse)?;
        Self::from_jwk_value(&document)
    }

    /// Builds a key set from an already parsed JWK document.
    ///
    /// # Errors
    ///
    /// See [`from_jwk_document`](Self::from_jwk_document).
    pub fn from_jwk_value(document: &Value) -> Result<Self, KeySetError> {
        let object = document
            .as_object()
            .filter(|o| !o.is_empty())
            .ok_or(KeySetError::Shape("document must be a non-empty object"))?;
        let entries = object
            .get("keys")
            .and_then(Value::as_array)
            .ok_or(KeySetError::Shape("\"keys\" must be an array"))?;
        if entries.is_empty() {
            return Err(KeySetError::Shape("\"keys\" must not be empty"));
        }

        let validator = JwkValidator;
        let mut set = Self::new();
        for (index, entry) in entries.iter().enumerate() {
            validator.check(entry).map_err(|source| KeySetError::InvalidJwk { index, source })?;
            if let Some(key) = Key::from_jwk(entry)? {
                set.add(key)?;
            }
        }
        Ok(set)
    }

    /// Reads and builds a key set from a local JWK file.
    ///
    /// # Errors
    ///
    /// Returns [`KeySetError::FileNotFound`] or [`KeySetError::Read`] if the
    /// file is missing or unreadable, plus everything
    /// [`from_jwk_document`](Self::from_jwk_document) returns.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, KeySetError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(KeySetError::FileNotFound { path: path.to_path_buf() });
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|source| KeySetError::Read { path: path.to_path_buf(), source })?;
        Self::from_jwk_document(&raw)
    }
}

/// A key set shared between concurrent readers and an occasional reloader.
///
/// Starts unavailable until the first successful load or
/// [`replace`](Self::replace). Cloning is cheap and clones observe the same
/// published set.
#[derive(Clone, Default)]
pub struct SharedKeySet {
    current: Arc<ArcSwapOption<KeySet>>,
}

impl fmt::Debug for SharedKeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedKeySet")
            .field("keys", &self.snapshot().map(|set| set.len()))
            .finish()
    }
}

impl From<KeySet> for SharedKeySet {
    fn from(set: KeySet) -> Self {
        let shared = Self::unavailable();
        shared.current.store(Some(Arc::new(set)));
        shared
    }
}

impl SharedKeySet {
    /// Creates a handle with no published key set.
    #[must_use]
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Returns the currently published key set, if any.
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<KeySet>> {
        self.current.load_full()
    }

    /// Whether a key set has been published.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.current.load().is_some()
    }

    /// Publishes a fully built key set, replacing the previous one.
    pub fn replace(&self, set: KeySet) {
        let kid_count = set.len();
        self.current.store(Some(Arc::new(set)));
        tracing::info!(
            audit.action = "reload_key_set",
            audit.result = "success",
            kid_count,
            "audit_event"
        );
    }

    /// Builds a key set from a raw JWK document and publishes it.
    ///
    /// On failure the previously published set stays in place.
    ///
    /// # Errors
    ///
    /// See [`KeySet::from_jwk_document`].
    #[tracing::instrument(skip(self, raw))]
    pub fn load_document(&self, raw: &str) -> Result<Arc<KeySet>, KeySetError> {
        let set = KeySet::from_jwk_document(raw)?;
        self.publish(set, "document")
    }

    /// Builds a key set from a local JWK file and publishes it.
    ///
    /// On failure the previously published set stays in place.
    ///
    /// # Errors
    ///
    /// See [`KeySet::from_path`].
    #[tracing::instrument(skip(self))]
    pub fn load_path(&self, path: &Path) -> Result<Arc<KeySet>, KeySetError> {
        let set = KeySet::from_path(path)?;
        self.publish(set, "file")
    }

    fn publish(&self, set: KeySet, source: &'static str) -> Result<Arc<KeySet>, KeySetError> {
        fail_point!("key-set-before-swap", |_| {
            Err(KeySetError::unusable_key("<failpoint>", "injected failure before swap"))
        });
        let set = Arc::new(set);
        self.current.store(Some(Arc::clone(&set)));
        tracing::info!(
            audit.action = "reload_key_set",
            audit.result = "success",
            kid_count = set.len(),
            source,
            "audit_event"
        );
        Ok(set)
    }
}
