//! Whole-file authenticated encryption using AES-256-GCM.

use crate::error::{CoreError, CoreResult, DecryptionFailure};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;
/// Smallest possible sealed blob: an empty plaintext.
pub const MIN_SEALED_SIZE: usize = NONCE_SIZE + TAG_SIZE;

/// Derived symmetric key material.
///
/// Held only in process memory while a database is open and zeroized when
/// dropped. Never persisted.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    bytes: [u8; KEY_SIZE],
}

impl KeyMaterial {
    /// Generates a new random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CoreError::invalid_key_size(bytes.len(), KEY_SIZE));
        }

        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    pub(crate) fn from_array(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Returns the key as a byte slice.
    ///
    /// # Security
    ///
    /// Be careful with this method - don't log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// The on-disk encrypted representation of a whole database file.
///
/// Layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`, where the
/// ciphertext is exactly as long as the plaintext.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedBlob(Vec<u8>);

impl SealedBlob {
    /// Wraps raw sealed bytes.
    #[must_use]
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the blob, returning its bytes.
    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }

    /// Returns the total length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the blob holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the length of the plaintext this blob decrypts to.
    #[must_use]
    pub fn plaintext_len(&self) -> usize {
        self.0.len().saturating_sub(MIN_SEALED_SIZE)
    }
}

impl std::fmt::Debug for SealedBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedBlob")
            .field("len", &self.0.len())
            .finish()
    }
}

/// Seals and opens whole database payloads with AES-256-GCM.
///
/// Every call to [`seal`](Self::seal) draws a fresh random nonce, so
/// sealing the same plaintext twice never yields the same blob.
pub struct AuthenticatedCipher {
    cipher: Aes256Gcm,
}

impl AuthenticatedCipher {
    /// Creates a cipher for the given key.
    #[must_use]
    pub fn new(key: &KeyMaterial) -> Self {
        // KeyMaterial is always exactly KEY_SIZE bytes, the AES-256 key size.
        let key_array = GenericArray::from_slice(key.as_bytes());
        let cipher = Aes256Gcm::new(key_array);
        Self { cipher }
    }

    /// Encrypts `plaintext` into a self-contained sealed blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the AEAD implementation rejects the input
    /// (plaintext beyond the GCM length limit).
    pub fn seal(&self, plaintext: &[u8]) -> CoreResult<SealedBlob> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CoreError::encryption_failed("AES-GCM encryption error"))?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend(ciphertext);

        Ok(SealedBlob(result))
    }

    /// Decrypts the contents of a sealed file.
    ///
    /// An empty input means "no database yet" and yields `Ok(None)` rather
    /// than a decryption attempt.
    ///
    /// # Errors
    ///
    /// - [`DecryptionFailure::Truncated`] if the input is non-empty but too
    ///   short to hold a nonce and a tag
    /// - [`DecryptionFailure::AuthenticationFailed`] if the tag does not
    ///   verify. A wrong key and a corrupted blob both end up here.
    pub fn open(&self, blob: &[u8]) -> CoreResult<Option<Zeroizing<Vec<u8>>>> {
        if blob.is_empty() {
            return Ok(None);
        }
        if blob.len() < MIN_SEALED_SIZE {
            return Err(CoreError::decryption(DecryptionFailure::Truncated));
        }

        let nonce = Nonce::from_slice(&blob[..NONCE_SIZE]);
        let encrypted = &blob[NONCE_SIZE..];

        self.cipher
            .decrypt(nonce, encrypted)
            .map(|plaintext| Some(Zeroizing::new(plaintext)))
            .map_err(|_| CoreError::decryption(DecryptionFailure::AuthenticationFailed))
    }
}

impl std::fmt::Debug for AuthenticatedCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedCipher")
            .field("cipher", &"Aes256Gcm")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn open_some(cipher: &AuthenticatedCipher, blob: &[u8]) -> Vec<u8> {
        cipher.open(blob).unwrap().unwrap().to_vec()
    }

    #[test]
    fn generate_key() {
        let key1 = KeyMaterial::generate();
        let key2 = KeyMaterial::generate();
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn key_wrong_size() {
        assert!(KeyMaterial::from_bytes(&[0u8; 16]).is_err());
        assert!(KeyMaterial::from_bytes(&[0u8; 64]).is_err());
        assert!(KeyMaterial::from_bytes(&[7u8; KEY_SIZE]).is_ok());
    }

    #[test]
    fn key_debug_is_redacted() {
        let key = KeyMaterial::from_bytes(&[0xAB; KEY_SIZE]).unwrap();
        let printed = format!("{key:?}");
        assert!(printed.contains("REDACTED"));
        assert!(!printed.contains("171"));
    }

    #[test]
    fn seal_open_roundtrip() {
        let cipher = AuthenticatedCipher::new(&KeyMaterial::generate());

        let plaintext = b"SQLite format 3\0 and some pages";
        let blob = cipher.seal(plaintext).unwrap();

        assert_eq!(blob.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);
        assert_eq!(blob.plaintext_len(), plaintext.len());
        assert_ne!(&blob.as_bytes()[NONCE_SIZE..NONCE_SIZE + plaintext.len()], plaintext);
        assert_eq!(open_some(&cipher, blob.as_bytes()), plaintext);
    }

    #[test]
    fn seal_uses_fresh_nonce() {
        let cipher = AuthenticatedCipher::new(&KeyMaterial::generate());

        let b1 = cipher.seal(b"same data").unwrap();
        let b2 = cipher.seal(b"same data").unwrap();

        assert_ne!(b1.as_bytes()[..NONCE_SIZE], b2.as_bytes()[..NONCE_SIZE]);
        assert_ne!(b1, b2);
    }

    #[test]
    fn open_empty_means_no_database() {
        let cipher = AuthenticatedCipher::new(&KeyMaterial::generate());
        assert!(cipher.open(&[]).unwrap().is_none());
    }

    #[test]
    fn open_truncated_fails() {
        let cipher = AuthenticatedCipher::new(&KeyMaterial::generate());
        let result = cipher.open(&[0u8; MIN_SEALED_SIZE - 1]);
        assert!(matches!(
            result,
            Err(CoreError::Decryption {
                reason: DecryptionFailure::Truncated
            })
        ));
    }

    #[test]
    fn open_wrong_key_fails_authentication() {
        let c1 = AuthenticatedCipher::new(&KeyMaterial::generate());
        let c2 = AuthenticatedCipher::new(&KeyMaterial::generate());

        let blob = c1.seal(b"secret").unwrap();
        assert!(matches!(
            c2.open(blob.as_bytes()),
            Err(CoreError::Decryption {
                reason: DecryptionFailure::AuthenticationFailed
            })
        ));
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let cipher = AuthenticatedCipher::new(&KeyMaterial::generate());
        let blob = cipher.seal(b"").unwrap();
        assert_eq!(blob.len(), MIN_SEALED_SIZE);
        assert!(open_some(&cipher, blob.as_bytes()).is_empty());
    }

    #[test]
    fn large_plaintext() {
        let cipher = AuthenticatedCipher::new(&KeyMaterial::generate());
        let plaintext = vec![0xAB; 1024 * 1024];
        let blob = cipher.seal(&plaintext).unwrap();
        assert_eq!(open_some(&cipher, blob.as_bytes()), plaintext);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn any_plaintext_roundtrips(plaintext in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let cipher = AuthenticatedCipher::new(&KeyMaterial::generate());
            let blob = cipher.seal(&plaintext).unwrap();
            prop_assert_eq!(open_some(&cipher, blob.as_bytes()), plaintext);
        }

        #[test]
        fn any_single_byte_flip_is_detected(
            plaintext in proptest::collection::vec(any::<u8>(), 0..512),
            position in any::<prop::sample::Index>(),
            mask in 1u8..=255,
        ) {
            let cipher = AuthenticatedCipher::new(&KeyMaterial::generate());
            let mut blob = cipher.seal(&plaintext).unwrap().into_vec();
            let i = position.index(blob.len());
            blob[i] ^= mask;

            let is_auth_failure = matches!(
                cipher.open(&blob),
                Err(CoreError::Decryption { reason: DecryptionFailure::AuthenticationFailed })
            );
            prop_assert!(is_auth_failure);
        }
    }
}
