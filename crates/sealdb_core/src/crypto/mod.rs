//! Cryptographic operations for SealDB.
//!
//! The whole database file is sealed as a single AES-256-GCM blob under a
//! key derived from the user's password.
//!
//! ## Security Model
//!
//! - Uses AES-256-GCM for authenticated encryption
//! - Unique random nonce per seal
//! - Keys are derived with PBKDF2-HMAC-SHA256 and a per-installation salt
//! - Keys are zeroized on drop and never persisted
//!
//! ## Usage
//!
//! ```rust
//! use sealdb_core::crypto::{derive_key, AuthenticatedCipher, Salt};
//!
//! let salt = Salt::generate();
//! let key = derive_key("correct-horse", &salt, 1_000);
//! let cipher = AuthenticatedCipher::new(&key);
//!
//! let sealed = cipher.seal(b"SQLite format 3\0").unwrap();
//! let opened = cipher.open(sealed.as_bytes()).unwrap().unwrap();
//! assert_eq!(&opened[..], b"SQLite format 3\0");
//! ```

mod cipher;
mod kdf;

pub use cipher::{
    AuthenticatedCipher, KeyMaterial, SealedBlob, KEY_SIZE, MIN_SEALED_SIZE, NONCE_SIZE, TAG_SIZE,
};
pub use kdf::{derive_key, KeyDerivation, Salt, PENDING_SALT_KEY, SALT_KEY, SALT_SIZE};
