//! Password-based key derivation and per-installation salt management.

use crate::config::Config;
use crate::crypto::cipher::{KeyMaterial, KEY_SIZE};
use crate::error::{CoreError, CoreResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sealdb_storage::SettingsStore;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, info};
use zeroize::Zeroize;

/// Size of the per-installation salt in bytes.
pub const SALT_SIZE: usize = 16;

/// Settings key (without namespace) holding the active salt.
pub const SALT_KEY: &str = "salt";
/// Settings key (without namespace) holding a salt staged by a rekey.
pub const PENDING_SALT_KEY: &str = "pending_salt";

/// A random per-installation salt.
///
/// Once created it never changes unless every byte of the encrypted
/// database is re-sealed under a key derived with the new salt.
#[derive(Clone, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    /// Generates a fresh salt from the operating system RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Creates a salt from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `bytes` is not [`SALT_SIZE`] long.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let array: [u8; SALT_SIZE] = bytes.try_into().map_err(|_| {
            CoreError::configuration(format!(
                "salt must be {SALT_SIZE} bytes, found {}",
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Returns the raw salt bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }

    /// Encodes the salt for the settings store.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Decodes a salt read from the settings store.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the value is not valid base64 of the
    /// right length.
    pub fn from_base64(encoded: &str) -> CoreResult<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CoreError::configuration(format!("salt is not valid base64: {e}")))?;
        Self::from_bytes(&bytes)
    }
}

impl std::fmt::Debug for Salt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Salt").field(&self.to_base64()).finish()
    }
}

/// Derives a 256-bit key from a password with PBKDF2-HMAC-SHA256.
///
/// Deliberately slow and fully deterministic: the same password, salt and
/// iteration count always produce the same key.
#[must_use]
pub fn derive_key(password: &str, salt: &Salt, iterations: u32) -> KeyMaterial {
    let mut bytes = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), iterations, &mut bytes);
    let key = KeyMaterial::from_array(bytes);
    bytes.zeroize();
    key
}

/// Turns a password plus the installation salt into key material.
///
/// Owns the salt's lifecycle in the injected settings store. Any settings
/// failure surfaces as [`CoreError::Configuration`], which is fatal and
/// never retried.
pub struct KeyDerivation {
    settings: Arc<dyn SettingsStore>,
    salt_key: String,
    pending_key: String,
    iterations: u32,
}

impl KeyDerivation {
    /// Creates a key derivation bound to a settings store.
    #[must_use]
    pub fn new(settings: Arc<dyn SettingsStore>, config: &Config) -> Self {
        Self {
            settings,
            salt_key: config.settings_key(SALT_KEY),
            pending_key: config.settings_key(PENDING_SALT_KEY),
            iterations: config.kdf_iterations,
        }
    }

    /// Returns the persisted salt, creating and persisting one first if absent.
    ///
    /// Two racing first runs both generate and persist a salt; the last
    /// writer wins. Only one process owns an installation at a time, so the
    /// loser's salt is never used to seal anything.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the store is unreachable or the
    /// stored salt is malformed. A malformed salt is never silently replaced.
    pub fn get_or_create_salt(&self) -> CoreResult<Salt> {
        if let Some(encoded) = self.read(&self.salt_key)? {
            return Salt::from_base64(&encoded);
        }

        let salt = Salt::generate();
        self.write(&self.salt_key, &salt.to_base64())?;
        info!("generated new installation salt");
        Ok(salt)
    }

    /// Returns the persisted salt without creating one.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the store is unreachable or the
    /// stored salt is malformed.
    pub fn current_salt(&self) -> CoreResult<Option<Salt>> {
        self.read(&self.salt_key)?
            .map(|encoded| Salt::from_base64(&encoded))
            .transpose()
    }

    /// Returns the salt staged by an interrupted rekey, if any.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the store is unreachable.
    pub fn pending_salt(&self) -> CoreResult<Option<Salt>> {
        self.read(&self.pending_key)?
            .map(|encoded| Salt::from_base64(&encoded))
            .transpose()
    }

    /// Stages `salt` as the next salt before any data is sealed under it.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the store is unreachable.
    pub fn stage_pending_salt(&self, salt: &Salt) -> CoreResult<()> {
        self.write(&self.pending_key, &salt.to_base64())
    }

    /// Makes the staged salt the active salt.
    ///
    /// Call only after the encrypted file has been re-sealed under a key
    /// derived from the staged salt.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if there is no staged salt or the store
    /// is unreachable.
    pub fn promote_pending_salt(&self) -> CoreResult<Salt> {
        let salt = self
            .pending_salt()?
            .ok_or_else(|| CoreError::configuration("no pending salt to promote"))?;
        self.write(&self.salt_key, &salt.to_base64())?;
        self.discard_pending_salt()?;
        debug!("promoted pending salt");
        Ok(salt)
    }

    /// Drops a staged salt that was never used.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the store is unreachable.
    pub fn discard_pending_salt(&self) -> CoreResult<()> {
        self.settings
            .remove(&self.pending_key)
            .map_err(|e| CoreError::configuration(e.to_string()))
    }

    /// Derives key material for `password` under `salt`.
    #[must_use]
    pub fn derive_key(&self, password: &str, salt: &Salt) -> KeyMaterial {
        derive_key(password, salt, self.iterations)
    }

    fn read(&self, key: &str) -> CoreResult<Option<String>> {
        self.settings
            .get(key)
            .map_err(|e| CoreError::configuration(e.to_string()))
    }

    fn write(&self, key: &str, value: &str) -> CoreResult<()> {
        self.settings
            .set(key, value)
            .map_err(|e| CoreError::configuration(e.to_string()))
    }
}

impl std::fmt::Debug for KeyDerivation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyDerivation")
            .field("salt_key", &self.salt_key)
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}
