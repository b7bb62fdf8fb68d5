use codedrop_crypto::CryptoError;
use thiserror::Error;

pub type TransferResult<T> = Result<T, TransferError>;

/// Rejected input. The `Display` text is the reason shown to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid code")]
    InvalidCode,

    #[error("Invalid payload")]
    InvalidPayload { detail: String },

    #[error("File too large")]
    FileSize { size: i64, max: u64 },

    #[error("Invalid expiry")]
    InvalidExpiry,
}

impl ValidationError {
    pub fn payload(detail: impl Into<String>) -> Self {
        Self::InvalidPayload {
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No record exists for the code.
    #[error("Not found")]
    NotFound,

    /// A record exists but its expiry has passed.
    #[error("Expired")]
    Expired,

    /// A live transfer already holds the code.
    #[error("Code in use")]
    CodeInUse,

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("crypto error: {0}")]
    Crypto(CryptoError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),
}

impl From<CryptoError> for TransferError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::DecryptionFailed => Self::DecryptionFailed,
            CryptoError::InvalidLength { .. } | CryptoError::InvalidEncoding { .. } => {
                Self::Validation(ValidationError::payload(err.to_string()))
            }
            other => Self::Crypto(other),
        }
    }
}

impl TransferError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }
}
