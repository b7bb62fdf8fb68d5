//! Key derivation: PBKDF2-HMAC-SHA256 transfer code → key-encrypting key

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::{KEY_SIZE, SALT_SIZE};

/// PBKDF2 iteration count used when a sender does not say otherwise, and the
/// minimum accepted by production configuration.
pub const DEFAULT_ITERATIONS: u32 = 210_000;

/// Largest iteration count a recipient will run.
pub const MAX_ITERATIONS: u32 = 10_000_000;

/// A 256-bit key-encrypting key derived from a transfer code.
///
/// Only ever used to wrap or unwrap a content key. Never persisted, and
/// zeroized on drop.
#[derive(Clone)]
pub struct Kek {
    bytes: [u8; KEY_SIZE],
}

impl Kek {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for Kek {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for Kek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kek").field("bytes", &"[REDACTED]").finish()
    }
}

/// PBKDF2 parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdfParams {
    /// HMAC-SHA256 iterations (default: 210000)
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

/// Derive a KEK from a transfer code and salt with PBKDF2-HMAC-SHA256.
///
/// Deterministic: sender and recipient re-derive the same KEK from the code
/// and the stored salt. The salt must be exactly 16 bytes; an empty code or a
/// short salt is an error rather than a silent fallback.
pub fn derive_kek(
    code: &SecretString,
    salt: &[u8],
    params: &KdfParams,
) -> Result<Kek, CryptoError> {
    let code = code.expose_secret();
    if code.is_empty() {
        return Err(CryptoError::EmptyCode);
    }
    if salt.len() != SALT_SIZE {
        return Err(CryptoError::InvalidSalt {
            expected: SALT_SIZE,
            got: salt.len(),
        });
    }
    if params.iterations == 0 || params.iterations > MAX_ITERATIONS {
        return Err(CryptoError::InvalidIterations);
    }

    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(code.as_bytes(), salt, params.iterations, &mut key);
    Ok(Kek::from_bytes(key))
}

/// Generate a fresh random 16-byte salt.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}
