//! Content key generation and AES-256-GCM key wrapping under the KEK

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::kdf::Kek;
use crate::{KEY_SIZE, NONCE_SIZE, WRAPPED_KEY_SIZE};

/// A per-transfer 256-bit content key. Zeroized on drop.
///
/// Always random, never derived from the code, so a weak KEK only exposes
/// the wrapped key and not the file directly.
#[derive(Clone)]
pub struct ContentKey {
    bytes: [u8; KEY_SIZE],
}

impl ContentKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for ContentKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 256-bit content key.
pub fn generate_content_key() -> ContentKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    ContentKey::from_bytes(bytes)
}

/// Generate a random 96-bit nonce. Keys are single-use per transfer, so a
/// fresh random nonce per encryption call never repeats under one key.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Wrap (encrypt) a content key under the KEK.
///
/// Output: `[32-byte encrypted key][16-byte tag]`; the nonce is stored
/// separately in the key material.
pub fn wrap_content_key(
    content_key: &ContentKey,
    kek: &Kek,
    nonce: &[u8; NONCE_SIZE],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(kek.as_bytes().into());
    cipher
        .encrypt(Nonce::from_slice(nonce), content_key.as_bytes().as_ref())
        .map_err(|_| CryptoError::EncryptionFailed)
}

/// Unwrap (decrypt) a content key with the KEK.
///
/// Fails with [`CryptoError::DecryptionFailed`] when the KEK came from a
/// different code: the tag check is the only authorization for decryption.
pub fn unwrap_content_key(
    wrapped: &[u8],
    kek: &Kek,
    nonce: &[u8; NONCE_SIZE],
) -> Result<ContentKey, CryptoError> {
    if wrapped.len() != WRAPPED_KEY_SIZE {
        return Err(CryptoError::InvalidLength {
            field: "wrapped content key",
            expected: WRAPPED_KEY_SIZE,
            got: wrapped.len(),
        });
    }

    let cipher = Aes256Gcm::new(kek.as_bytes().into());
    let mut plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), wrapped)
        .map_err(|_| CryptoError::DecryptionFailed)?;

    let mut key_bytes = [0u8; KEY_SIZE];
    key_bytes.copy_from_slice(&plaintext);
    plaintext.zeroize();

    Ok(ContentKey::from_bytes(key_bytes))
}
