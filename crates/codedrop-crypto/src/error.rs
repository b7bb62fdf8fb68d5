use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("transfer code must not be empty")]
    EmptyCode,

    #[error("salt must be {expected} bytes, got {got}")]
    InvalidSalt { expected: usize, got: usize },

    #[error("PBKDF2 iteration count must be between 1 and {}", crate::kdf::MAX_ITERATIONS)]
    InvalidIterations,

    #[error("{field} must be {expected} bytes, got {got}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{field} is not valid base64")]
    InvalidEncoding { field: &'static str },

    #[error("encryption failed")]
    EncryptionFailed,

    /// Authentication tag mismatch. Deliberately silent about whether the
    /// code was wrong or the data was corrupted.
    #[error("decryption failed")]
    DecryptionFailed,
}
