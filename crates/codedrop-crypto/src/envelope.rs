//! File encryption under the content key, plus the full sender/recipient flows
//!
//! Ciphertext format (binary):
//! ```text
//! [N bytes: AES-256-GCM ciphertext][16 bytes: tag]
//! ```
//!
//! The nonce is not prefixed; it travels in [`KeyMaterial`] so the stored
//! blob is exactly `plaintext.len() + 16` bytes.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use secrecy::SecretString;
use tracing::debug;

use crate::error::CryptoError;
use crate::kdf::{derive_kek, generate_salt, KdfParams};
use crate::keys::{
    generate_content_key, generate_nonce, unwrap_content_key, wrap_content_key, ContentKey,
};
use crate::material::KeyMaterial;
use crate::NONCE_SIZE;

/// Output of [`seal`]: the bytes to upload and the parameters needed to open them.
#[derive(Debug, Clone)]
pub struct SealedFile {
    pub ciphertext: Vec<u8>,
    pub key_material: KeyMaterial,
}

/// Encrypt file bytes under the content key.
pub fn encrypt_file(
    plaintext: &[u8],
    content_key: &ContentKey,
    nonce: &[u8; NONCE_SIZE],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(content_key.as_bytes().into());
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)
}

/// Decrypt file bytes with the content key.
///
/// Nothing is returned unless the tag verifies; there is no partial plaintext.
pub fn decrypt_file(
    ciphertext: &[u8],
    content_key: &ContentKey,
    nonce: &[u8; NONCE_SIZE],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(content_key.as_bytes().into());
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Sender side: encrypt `plaintext` for whoever knows `code`.
///
/// Generates a fresh content key, file nonce, salt and key-wrap nonce.
pub fn seal(
    plaintext: &[u8],
    code: &SecretString,
    params: &KdfParams,
) -> Result<SealedFile, CryptoError> {
    let content_key = generate_content_key();
    let file_nonce = generate_nonce();
    let ciphertext = encrypt_file(plaintext, &content_key, &file_nonce)?;

    let kek_salt = generate_salt();
    let kek = derive_kek(code, &kek_salt, params)?;
    let key_wrap_nonce = generate_nonce();
    let wrapped_content_key = wrap_content_key(&content_key, &kek, &key_wrap_nonce)?;

    debug!(
        plaintext_len = plaintext.len(),
        ciphertext_len = ciphertext.len(),
        "sealed file"
    );

    Ok(SealedFile {
        ciphertext,
        key_material: KeyMaterial {
            wrapped_content_key,
            file_nonce,
            key_wrap_nonce,
            kek_salt,
            kdf_iterations: params.iterations,
        },
    })
}

/// Recipient side: re-derive the KEK from `code` with the sender's salt and
/// iteration count, unwrap the content key and decrypt. A wrong code surfaces
/// as [`CryptoError::DecryptionFailed`].
pub fn open(
    ciphertext: &[u8],
    key_material: &KeyMaterial,
    code: &SecretString,
) -> Result<Vec<u8>, CryptoError> {
    let kek = derive_kek(code, &key_material.kek_salt, &key_material.kdf_params())?;
    let content_key = unwrap_content_key(
        &key_material.wrapped_content_key,
        &kek,
        &key_material.key_wrap_nonce,
    )?;
    decrypt_file(ciphertext, &content_key, &key_material.file_nonce)
}
