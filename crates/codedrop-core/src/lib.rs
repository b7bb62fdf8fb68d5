pub mod config;
pub mod error;
pub mod types;

pub use error::{TransferError, TransferResult, ValidationError};
pub use types::{TransferCode, TransferRecord, TransferSummary, UploadPayload};
