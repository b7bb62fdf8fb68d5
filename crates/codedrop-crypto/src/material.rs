//! Public parameters needed to open a sealed file: wrapped key, nonces, salt
//! and the PBKDF2 iteration count
//!
//! The byte fields are base64 (standard alphabet, padded) on the wire and in
//! stored records. A record without `kdfIterations` was sealed with
//! [`DEFAULT_ITERATIONS`].

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;
use crate::kdf::{KdfParams, DEFAULT_ITERATIONS, MAX_ITERATIONS};
use crate::{NONCE_SIZE, SALT_SIZE, WRAPPED_KEY_SIZE};

/// Wrapped content key plus the nonces, salt and iteration count used to
/// produce it.
///
/// Serialized field names match the stored metadata layout so a record can
/// `#[serde(flatten)]` this in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaterial {
    #[serde(rename = "encryptedFileKeyBase64", with = "b64_vec")]
    pub wrapped_content_key: Vec<u8>,
    #[serde(rename = "fileIvBase64", with = "b64_array")]
    pub file_nonce: [u8; NONCE_SIZE],
    #[serde(rename = "keyIvBase64", with = "b64_array")]
    pub key_wrap_nonce: [u8; NONCE_SIZE],
    #[serde(rename = "saltBase64", with = "b64_array")]
    pub kek_salt: [u8; SALT_SIZE],
    #[serde(rename = "kdfIterations", default = "default_iterations")]
    pub kdf_iterations: u32,
}

fn default_iterations() -> u32 {
    DEFAULT_ITERATIONS
}

/// Base64 text form of [`KeyMaterial`], as carried in request bodies and
/// response headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedKeyMaterial {
    pub wrapped_content_key: String,
    pub file_nonce: String,
    pub key_wrap_nonce: String,
    pub kek_salt: String,
    /// Carried as a plain integer, not base64
    pub kdf_iterations: u32,
}

impl KeyMaterial {
    /// Check fixed lengths and the iteration range. Nonce and salt sizes are
    /// enforced by their types; the wrapped key must be exactly key + tag.
    pub fn validate(&self) -> Result<(), CryptoError> {
        if self.kdf_iterations == 0 || self.kdf_iterations > MAX_ITERATIONS {
            return Err(CryptoError::InvalidIterations);
        }
        if self.wrapped_content_key.len() != WRAPPED_KEY_SIZE {
            return Err(CryptoError::InvalidLength {
                field: "wrapped content key",
                expected: WRAPPED_KEY_SIZE,
                got: self.wrapped_content_key.len(),
            });
        }
        Ok(())
    }

    /// KDF parameters the sender used; recipients must derive with these.
    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            iterations: self.kdf_iterations,
        }
    }

    pub fn encode(&self) -> EncodedKeyMaterial {
        EncodedKeyMaterial {
            wrapped_content_key: B64.encode(&self.wrapped_content_key),
            file_nonce: B64.encode(self.file_nonce),
            key_wrap_nonce: B64.encode(self.key_wrap_nonce),
            kek_salt: B64.encode(self.kek_salt),
            kdf_iterations: self.kdf_iterations,
        }
    }
}

impl EncodedKeyMaterial {
    /// Decode and check every field.
    pub fn decode(&self) -> Result<KeyMaterial, CryptoError> {
        let material = KeyMaterial {
            wrapped_content_key: decode_field("wrapped content key", &self.wrapped_content_key)?,
            file_nonce: decode_fixed("file nonce", &self.file_nonce)?,
            key_wrap_nonce: decode_fixed("key wrap nonce", &self.key_wrap_nonce)?,
            kek_salt: decode_fixed("salt", &self.kek_salt)?,
            kdf_iterations: self.kdf_iterations,
        };
        material.validate()?;
        Ok(material)
    }
}

fn decode_field(field: &'static str, value: &str) -> Result<Vec<u8>, CryptoError> {
    B64.decode(value.trim())
        .map_err(|_| CryptoError::InvalidEncoding { field })
}

fn decode_fixed<const N: usize>(field: &'static str, value: &str) -> Result<[u8; N], CryptoError> {
    let bytes = decode_field(field, value)?;
    let got = bytes.len();
    bytes.try_into().map_err(|_| CryptoError::InvalidLength {
        field,
        expected: N,
        got,
    })
}

mod b64_vec {
    use super::B64;
    use base64::Engine;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&B64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        B64.decode(text.as_bytes()).map_err(D::Error::custom)
    }
}

mod b64_array {
    use super::B64;
    use base64::Engine;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(bytes: &[u8; N], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&B64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        d: D,
    ) -> Result<[u8; N], D::Error> {
        let text = String::deserialize(d)?;
        let bytes = B64.decode(text.as_bytes()).map_err(D::Error::custom)?;
        let got = bytes.len();
        bytes
            .try_into()
            .map_err(|_| D::Error::custom(format!("expected {N} bytes, got {got}")))
    }
}
