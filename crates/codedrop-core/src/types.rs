use base64::{engine::general_purpose::STANDARD as B64, Engine};
use chrono::{DateTime, TimeDelta, Utc};
use codedrop_crypto::{EncodedKeyMaterial, KeyMaterial, SealedFile, DEFAULT_ITERATIONS, TAG_SIZE};
use serde::{Deserialize, Serialize};

use crate::config::TransferConfig;
use crate::error::ValidationError;

/// Prefix under which transfer metadata records live.
pub const META_PREFIX: &str = "meta/";

/// Prefix under which ciphertext blobs live.
pub const BLOB_PREFIX: &str = "files/";

/// Content type of every stored ciphertext blob.
pub const CIPHERTEXT_CONTENT_TYPE: &str = "application/octet-stream";

/// Response headers carrying key material on a fetch with `includeKey=1`.
pub const HEADER_ENCRYPTED_FILE_KEY: &str = "x-encrypted-file-key";
pub const HEADER_FILE_IV: &str = "x-file-iv";
pub const HEADER_KEY_IV: &str = "x-key-iv";
pub const HEADER_SALT: &str = "x-salt";
/// Clients treat a missing iteration header as the default count.
pub const HEADER_KDF_ITERATIONS: &str = "x-kdf-iterations";

const MAX_NAME_LEN: usize = 255;

/// Metadata key for a code: `meta/{code}.json`
pub fn meta_key(code: &TransferCode) -> String {
    format!("{META_PREFIX}{}.json", code.as_str())
}

/// Blob key for an object id: `files/{id}`
pub fn blob_key(object_id: &str) -> String {
    format!("{BLOB_PREFIX}{object_id}")
}

/// A validated transfer code.
///
/// Deliberately has no `Display` impl so it does not end up in log lines.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TransferCode(String);

impl TransferCode {
    /// Accept `min_len..=max_len` ASCII alphanumeric characters.
    pub fn new(code: &str, min_len: usize, max_len: usize) -> Result<Self, ValidationError> {
        let len = code.chars().count();
        if len < min_len || len > max_len || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ValidationError::InvalidCode);
        }
        Ok(Self(code.to_string()))
    }

    /// Validate against the default 4..=8 bounds.
    pub fn parse(code: &str) -> Result<Self, ValidationError> {
        let defaults = TransferConfig::default();
        Self::new(code, defaults.min_code_len, defaults.max_code_len)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for TransferCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TransferCode").field(&"[REDACTED]").finish()
    }
}

/// Stored metadata for one transfer, at `meta/{code}.json`.
///
/// Created once and never modified; removed by the retention sweeper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    /// Opaque random id of the ciphertext blob, independent of the code
    #[serde(rename = "objectId")]
    pub id: String,
    #[serde(default)]
    pub code: String,
    /// Blob store key of the ciphertext
    #[serde(rename = "fileKey")]
    pub blob_location: String,
    pub file_name: String,
    pub file_type: String,
    #[serde(rename = "fileSize")]
    pub file_size_bytes: u64,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub key_material: KeyMaterial,
}

impl TransferRecord {
    /// Live iff `expires_at > now`; a record expiring exactly now is expired.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    pub fn summary(&self) -> TransferSummary {
        TransferSummary {
            file_name: self.file_name.clone(),
            file_type: self.file_type.clone(),
            file_size: self.file_size_bytes,
            expires_at: self.expires_at,
        }
    }
}

/// Metadata-only view returned by a lookup. Carries no key material and no
/// blob location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSummary {
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    pub expires_at: DateTime<Utc>,
}

/// JSON body of `POST /transfers`.
///
/// Every field is optional so a missing field is reported as a validation
/// reason instead of a parse failure. The `...Base64` names are accepted as
/// aliases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPayload {
    pub code: Option<String>,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub file_size: Option<i64>,
    pub expires_at: Option<String>,
    #[serde(alias = "encryptedFileBase64")]
    pub encrypted_file: Option<String>,
    #[serde(alias = "encryptedFileKeyBase64")]
    pub encrypted_file_key: Option<String>,
    #[serde(alias = "fileIvBase64")]
    pub file_iv: Option<String>,
    #[serde(alias = "keyIvBase64")]
    pub key_iv: Option<String>,
    #[serde(alias = "saltBase64")]
    pub salt: Option<String>,
    /// PBKDF2 iterations the sender used; absent means the default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kdf_iterations: Option<u32>,
}

/// A fully validated upload, ready to be persisted.
#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub code: TransferCode,
    pub file_name: String,
    pub file_type: String,
    pub file_size_bytes: u64,
    pub expires_at: DateTime<Utc>,
    pub ciphertext: Vec<u8>,
    pub key_material: KeyMaterial,
}

impl UploadPayload {
    /// Build the payload for a file sealed on the client.
    pub fn from_sealed(
        code: &str,
        file_name: &str,
        file_type: &str,
        file_size: u64,
        expires_at: DateTime<Utc>,
        sealed: &SealedFile,
    ) -> Self {
        let encoded = sealed.key_material.encode();
        Self {
            code: Some(code.to_string()),
            file_name: Some(file_name.to_string()),
            file_type: Some(file_type.to_string()),
            file_size: i64::try_from(file_size).ok(),
            expires_at: Some(expires_at.to_rfc3339()),
            encrypted_file: Some(B64.encode(&sealed.ciphertext)),
            encrypted_file_key: Some(encoded.wrapped_content_key),
            file_iv: Some(encoded.file_nonce),
            key_iv: Some(encoded.key_wrap_nonce),
            salt: Some(encoded.kek_salt),
            kdf_iterations: Some(encoded.kdf_iterations),
        }
    }

    /// Validate in order: code, payload presence, size, expiry, then key
    /// material and ciphertext length. The first failure wins.
    pub fn validate(
        self,
        policy: &TransferConfig,
        now: DateTime<Utc>,
    ) -> Result<NewTransfer, ValidationError> {
        let code = self.code.as_deref().ok_or(ValidationError::InvalidCode)?;
        let code = TransferCode::new(code, policy.min_code_len, policy.max_code_len)?;

        let file_name = non_empty(self.file_name, "fileName")?;
        let encrypted_file = non_empty(self.encrypted_file, "encryptedFile")?;
        let encrypted_file_key = non_empty(self.encrypted_file_key, "encryptedFileKey")?;
        if file_name.len() > MAX_NAME_LEN || file_name.chars().any(char::is_control) {
            return Err(ValidationError::payload("fileName is too long or has control characters"));
        }
        let file_type = self
            .file_type
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        if file_type.len() > MAX_NAME_LEN {
            return Err(ValidationError::payload("fileType is too long"));
        }

        let size = self.file_size.unwrap_or(0);
        let file_size_bytes = u64::try_from(size)
            .ok()
            .filter(|s| *s >= 1 && *s <= policy.max_file_size_bytes)
            .ok_or(ValidationError::FileSize {
                size,
                max: policy.max_file_size_bytes,
            })?;

        let expires_at = self
            .expires_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or(ValidationError::InvalidExpiry)?;
        if expires_at <= now {
            return Err(ValidationError::InvalidExpiry);
        }
        let latest = i64::try_from(policy.max_ttl_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl));
        if latest.is_some_and(|latest| expires_at > latest) {
            return Err(ValidationError::InvalidExpiry);
        }

        let key_material = EncodedKeyMaterial {
            wrapped_content_key: encrypted_file_key,
            file_nonce: non_empty(self.file_iv, "fileIv")?,
            key_wrap_nonce: non_empty(self.key_iv, "keyIv")?,
            kek_salt: non_empty(self.salt, "salt")?,
            kdf_iterations: self.kdf_iterations.unwrap_or(DEFAULT_ITERATIONS),
        }
        .decode()
        .map_err(|e| ValidationError::payload(e.to_string()))?;

        let ciphertext = B64
            .decode(encrypted_file.trim())
            .map_err(|_| ValidationError::payload("encryptedFile is not valid base64"))?;
        let expected = file_size_bytes + TAG_SIZE as u64;
        if ciphertext.len() as u64 != expected {
            return Err(ValidationError::payload(format!(
                "ciphertext is {} bytes, expected {expected}",
                ciphertext.len()
            )));
        }

        Ok(NewTransfer {
            code,
            file_name,
            file_type,
            file_size_bytes,
            expires_at,
            ciphertext,
            key_material,
        })
    }
}

fn non_empty(value: Option<String>, field: &str) -> Result<String, ValidationError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ValidationError::payload(format!("missing {field}")))
}
