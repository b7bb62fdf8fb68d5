//! Transfer lifecycle: create, describe, fetch
//!
//! State machine per code:
//! ```text
//! [absent] --create--> [live] --expires_at <= now--> [expired] --sweep--> [absent]
//! ```
//!
//! Expiry is evaluated lazily at access time. All state lives in the store;
//! a `TransferService` holds no mutable state and may run as many concurrent
//! stateless instances.
//!
//! Write order on create: ciphertext blob first, then the metadata record,
//! so a record is never observable without its ciphertext.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use tracing::{debug, info, warn};

use codedrop_core::config::TransferConfig;
use codedrop_core::types::{blob_key, meta_key, NewTransfer, CIPHERTEXT_CONTENT_TYPE};
use codedrop_core::{
    TransferCode, TransferError, TransferRecord, TransferResult, TransferSummary, UploadPayload,
};
use codedrop_crypto::KeyMaterial;
use codedrop_storage::{StoreError, TransferStore};

use crate::sweeper::{remove_if_current, RetentionSweeper, SweepReport};

/// Source of "now". Injected so expiry can be tested at exact boundaries.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Returned by a successful create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub object_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Ciphertext stream plus, when requested, the key material to open it.
pub struct FetchedTransfer {
    pub body: BoxStream<'static, std::io::Result<Bytes>>,
    pub content_length: u64,
    pub content_type: String,
    /// Present only when the caller asked to reveal the key
    pub key_material: Option<KeyMaterial>,
}

impl std::fmt::Debug for FetchedTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedTransfer")
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .field("key_material", &self.key_material.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct TransferService {
    store: Arc<dyn TransferStore>,
    policy: TransferConfig,
    clock: Clock,
}

impl TransferService {
    pub fn new(store: Arc<dyn TransferStore>, policy: TransferConfig) -> Self {
        Self {
            store,
            policy,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> &TransferConfig {
        &self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Validate an upload and persist ciphertext then metadata.
    ///
    /// A live transfer already holding the code yields `CodeInUse`; an
    /// expired one is reclaimed first.
    pub async fn create(&self, payload: UploadPayload) -> TransferResult<TransferReceipt> {
        let now = self.now();
        let new = payload.validate(&self.policy, now)?;
        let meta = meta_key(&new.code);

        if let Some(existing) = self.load_record(&meta).await? {
            if existing.is_live(now) {
                return Err(TransferError::CodeInUse);
            }
            info!(object_id = %existing.id, "reclaiming expired transfer for new upload");
            // If another create got there first, the conditional write below
            // decides which upload wins.
            remove_if_current(self.store.as_ref(), &meta, &existing, &self.clock).await?;
        }

        let object_id = uuid::Uuid::new_v4().to_string();
        let record = self.persist(new, object_id, &meta, now).await?;

        info!(
            object_id = %record.id,
            file_size = record.file_size_bytes,
            expires_at = %record.expires_at,
            "transfer created"
        );

        Ok(TransferReceipt {
            object_id: record.id,
            expires_at: record.expires_at,
        })
    }

    async fn persist(
        &self,
        new: NewTransfer,
        object_id: String,
        meta: &str,
        now: DateTime<Utc>,
    ) -> TransferResult<TransferRecord> {
        let blob = blob_key(&object_id);
        self.store
            .put_bytes(&blob, new.ciphertext, CIPHERTEXT_CONTENT_TYPE)
            .await
            .map_err(TransferError::storage)?;

        let record = TransferRecord {
            id: object_id,
            code: new.code.as_str().to_string(),
            blob_location: blob.clone(),
            file_name: new.file_name,
            file_type: new.file_type,
            file_size_bytes: new.file_size_bytes,
            expires_at: new.expires_at,
            created_at: now,
            key_material: new.key_material,
        };
        let value = serde_json::to_value(&record).map_err(TransferError::storage)?;

        match self.store.put_json_if_absent(meta, &value).await {
            Ok(()) => Ok(record),
            Err(e) => {
                // The metadata write lost; drop the blob so it is not orphaned.
                if let Err(cleanup) = self.store.delete_object(&blob).await {
                    warn!(object_id = %record.id, "failed to remove orphaned blob: {cleanup}");
                }
                match e {
                    StoreError::AlreadyExists(_) => Err(TransferError::CodeInUse),
                    other => Err(TransferError::storage(other)),
                }
            }
        }
    }

    /// Metadata-only lookup. Never returns key material or the blob location.
    pub async fn describe(&self, code: &str) -> TransferResult<TransferSummary> {
        Ok(self.load_live(code).await?.summary())
    }

    /// Open the ciphertext stream. With `reveal_key`, the wrapped content key,
    /// nonces and salt are attached alongside (never mixed into the bytes).
    ///
    /// Fetching does not consume the transfer.
    pub async fn fetch(&self, code: &str, reveal_key: bool) -> TransferResult<FetchedTransfer> {
        let record = self.load_live(code).await?;

        let blob = self
            .store
            .get_bytes_stream(&record.blob_location)
            .await
            .map_err(TransferError::storage)?
            .ok_or_else(|| {
                warn!(object_id = %record.id, "live transfer has no ciphertext blob");
                TransferError::Storage(format!("ciphertext missing for {}", record.id))
            })?;

        debug!(object_id = %record.id, reveal_key, "transfer fetched");

        Ok(FetchedTransfer {
            body: blob.body,
            content_length: blob.content_length,
            content_type: blob.content_type,
            key_material: reveal_key.then_some(record.key_material),
        })
    }

    /// Delete every expired transfer. See [`RetentionSweeper::purge_expired`].
    pub async fn purge_expired(&self) -> TransferResult<SweepReport> {
        self.sweeper().purge_expired().await
    }

    pub fn sweeper(&self) -> RetentionSweeper {
        RetentionSweeper::new(self.store.clone()).with_clock(self.clock.clone())
    }

    async fn load_live(&self, code: &str) -> TransferResult<TransferRecord> {
        // A code that cannot have been created cannot exist.
        let code = TransferCode::new(code, self.policy.min_code_len, self.policy.max_code_len)
            .map_err(|_| TransferError::NotFound)?;

        let record = self
            .load_record(&meta_key(&code))
            .await?
            .ok_or(TransferError::NotFound)?;

        if !record.is_live(self.now()) {
            return Err(TransferError::Expired);
        }
        Ok(record)
    }

    async fn load_record(&self, meta: &str) -> TransferResult<Option<TransferRecord>> {
        let Some(value) = self
            .store
            .get_json(meta)
            .await
            .map_err(TransferError::storage)?
        else {
            return Ok(None);
        };
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| TransferError::Storage(format!("corrupt transfer record: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as B64, Engine};
    use chrono::TimeDelta;
    use codedrop_storage::{memory_operator, OpendalStore};

    fn fixed_clock(at: DateTime<Utc>) -> Clock {
        Arc::new(move || at)
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-19T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn service() -> TransferService {
        let store = Arc::new(OpendalStore::new(memory_operator().unwrap()));
        TransferService::new(store, TransferConfig::default()).with_clock(fixed_clock(t0()))
    }

    /// A structurally valid payload; the server never decrypts, so the
    /// ciphertext bytes can be arbitrary.
    fn payload(code: &str, size: u64, expires_at: DateTime<Utc>) -> UploadPayload {
        UploadPayload {
            code: Some(code.into()),
            file_name: Some("report.pdf".into()),
            file_type: Some("application/pdf".into()),
            file_size: Some(size as i64),
            expires_at: Some(expires_at.to_rfc3339()),
            encrypted_file: Some(B64.encode(vec![0u8; size as usize + 16])),
            encrypted_file_key: Some(B64.encode([1u8; 48])),
            file_iv: Some(B64.encode([2u8; 12])),
            key_iv: Some(B64.encode([3u8; 12])),
            salt: Some(B64.encode([4u8; 16])),
            kdf_iterations: None,
        }
    }

    #[tokio::test]
    async fn test_create_then_describe() {
        let svc = service();
        let receipt = svc
            .create(payload("482913", 10, t0() + TimeDelta::seconds(600)))
            .await
            .unwrap();
        assert_eq!(receipt.expires_at, t0() + TimeDelta::seconds(600));

        let summary = svc.describe("482913").await.unwrap();
        assert_eq!(summary.file_name, "report.pdf");
        assert_eq!(summary.file_size, 10);
    }

    #[tokio::test]
    async fn test_describe_unknown_code() {
        let err = service().describe("000000").await.unwrap_err();
        assert!(matches!(err, TransferError::NotFound));
    }

    #[tokio::test]
    async fn test_describe_malformed_code_is_not_found() {
        let err = service().describe("../../etc").await.unwrap_err();
        assert!(matches!(err, TransferError::NotFound));
    }

    #[tokio::test]
    async fn test_fetch_without_key() {
        let svc = service();
        svc.create(payload("482913", 10, t0() + TimeDelta::seconds(600)))
            .await
            .unwrap();

        let fetched = svc.fetch("482913", false).await.unwrap();
        assert_eq!(fetched.content_length, 26);
        assert!(fetched.key_material.is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_live_collision() {
        let svc = service();
        svc.create(payload("482913", 10, t0() + TimeDelta::seconds(600)))
            .await
            .unwrap();

        let err = svc
            .create(payload("482913", 20, t0() + TimeDelta::seconds(600)))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::CodeInUse));

        // first transfer untouched
        assert_eq!(svc.describe("482913").await.unwrap().file_size, 10);
    }

    #[tokio::test]
    async fn test_validation_error_surfaces() {
        let err = service()
            .create(payload("482913", 10, t0()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid expiry");
    }
}
