//! codedrop-crypto: envelope encryption keyed by a short transfer code
//!
//! Key hierarchy:
//! ```text
//! Transfer code (4-8 chars, shared out of band)
//!   └── KEK (256-bit, PBKDF2-HMAC-SHA256, 210k iterations, random 16-byte salt)
//!         └── wraps Content Key (256-bit random, per transfer) with AES-256-GCM
//!               └── encrypts file bytes with AES-256-GCM
//! ```
//!
//! Both AEAD layers use a fresh random 96-bit nonce. Nonces, salt, the PBKDF2
//! iteration count and the wrapped content key travel next to the ciphertext
//! as [`KeyMaterial`]; none of them is secret without the code. Recipients
//! derive with the transmitted iteration count, never a local setting.

pub mod code;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod material;

pub use code::{generate_code, DEFAULT_CODE_LEN};
pub use envelope::{decrypt_file, encrypt_file, open, seal, SealedFile};
pub use error::CryptoError;
pub use kdf::{derive_kek, generate_salt, KdfParams, Kek, DEFAULT_ITERATIONS, MAX_ITERATIONS};
pub use keys::{
    generate_content_key, generate_nonce, unwrap_content_key, wrap_content_key, ContentKey,
};
pub use material::{EncodedKeyMaterial, KeyMaterial};

/// Size of a symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of the PBKDF2 salt
pub const SALT_SIZE: usize = 16;

/// Size of a wrapped content key: key + tag
pub const WRAPPED_KEY_SIZE: usize = KEY_SIZE + TAG_SIZE;
