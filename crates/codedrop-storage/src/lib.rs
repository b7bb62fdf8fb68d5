//! codedrop-storage: OpenDAL operator factory + the blob/JSON store contract
//! the transfer lifecycle runs against

pub mod health;
pub mod operator;
pub mod store;

pub use health::check_health;
pub use operator::{build_operator, memory_operator, S3Credentials, StorageConfig};
pub use store::{BlobStream, OpendalStore, StoreError, StoreResult, TransferStore};
