//! Blob + JSON object store contract used by the transfer lifecycle.
//!
//! The store is an opaque key-value blob store with list/get/put/delete. No
//! transaction spans two keys; callers order their writes.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::lock::Mutex;
use futures::stream::{BoxStream, StreamExt};
use opendal::{ErrorKind, Operator};
use thiserror::Error;
use tracing::debug;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A conditional write found the key already present.
    #[error("object already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid JSON at {key}: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage backend error: {0}")]
    Backend(#[from] opendal::Error),
}

/// A readable ciphertext object. Dropping `body` mid-way releases the
/// underlying reader.
pub struct BlobStream {
    pub body: BoxStream<'static, std::io::Result<Bytes>>,
    pub content_length: u64,
    pub content_type: String,
}

impl std::fmt::Debug for BlobStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStream")
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait TransferStore: Send + Sync {
    async fn put_bytes(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> StoreResult<()>;

    /// `Ok(None)` when the key does not exist.
    async fn get_bytes_stream(&self, key: &str) -> StoreResult<Option<BlobStream>>;

    async fn put_json(&self, key: &str, value: &serde_json::Value) -> StoreResult<()>;

    /// Write only if `key` is absent; [`StoreError::AlreadyExists`] otherwise.
    async fn put_json_if_absent(&self, key: &str, value: &serde_json::Value) -> StoreResult<()>;

    /// `Ok(None)` when the key does not exist.
    async fn get_json(&self, key: &str) -> StoreResult<Option<serde_json::Value>>;

    /// Idempotent: deleting a missing key succeeds.
    async fn delete_object(&self, key: &str) -> StoreResult<()>;

    /// Object keys (not directories) directly under `prefix`.
    async fn list_keys(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

/// Map a failed write; a failed `if_not_exists` condition means the key is taken.
fn write_error(key: &str, err: opendal::Error) -> StoreError {
    if err.kind() == ErrorKind::ConditionNotMatch {
        StoreError::AlreadyExists(key.to_string())
    } else {
        StoreError::Backend(err)
    }
}

/// [`TransferStore`] over an OpenDAL operator.
///
/// On backends without `write_with_if_not_exists`, conditional writes are
/// check-then-write under a lock shared by clones of this store. That is
/// atomic within one process only.
#[derive(Clone, Debug)]
pub struct OpendalStore {
    op: Operator,
    conditional: Arc<Mutex<()>>,
}

impl OpendalStore {
    pub fn new(op: Operator) -> Self {
        Self {
            op,
            conditional: Arc::new(Mutex::new(())),
        }
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    async fn write_json(&self, key: &str, value: &serde_json::Value, if_absent: bool) -> StoreResult<()> {
        let body = serde_json::to_vec(value).map_err(|source| StoreError::Json {
            key: key.to_string(),
            source,
        })?;
        let cap = self.op.info().full_capability();

        let mut write = self.op.write_with(key, body);
        if cap.write_with_content_type {
            write = write.content_type("application/json");
        }
        if if_absent {
            write = write.if_not_exists(true);
        }

        write.await.map(|_| ()).map_err(|e| write_error(key, e))
    }
}

#[async_trait]
impl TransferStore for OpendalStore {
    async fn put_bytes(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> StoreResult<()> {
        let mut write = self.op.write_with(key, bytes);
        if self.op.info().full_capability().write_with_content_type {
            write = write.content_type(content_type);
        }
        write.await?;
        Ok(())
    }

    async fn get_bytes_stream(&self, key: &str) -> StoreResult<Option<BlobStream>> {
        let meta = match self.op.stat(key).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let reader = self.op.reader(key).await?;
        let body = reader.into_bytes_stream(..).await?;

        Ok(Some(BlobStream {
            body: body.boxed(),
            content_length: meta.content_length(),
            content_type: meta
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string(),
        }))
    }

    async fn put_json(&self, key: &str, value: &serde_json::Value) -> StoreResult<()> {
        self.write_json(key, value, false).await
    }

    async fn put_json_if_absent(&self, key: &str, value: &serde_json::Value) -> StoreResult<()> {
        if self.op.info().full_capability().write_with_if_not_exists {
            return self.write_json(key, value, true).await;
        }
        debug!(key, "backend lacks write_with_if_not_exists, using stat-then-write");
        let _guard = self.conditional.lock().await;
        if self.op.exists(key).await? {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        self.write_json(key, value, false).await
    }

    async fn get_json(&self, key: &str) -> StoreResult<Option<serde_json::Value>> {
        match self.op.read(key).await {
            Ok(buf) => serde_json::from_slice(&buf.to_vec())
                .map(Some)
                .map_err(|source| StoreError::Json {
                    key: key.to_string(),
                    source,
                }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        match self.op.delete(key).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let entries = match self.op.list(prefix).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(entries
            .into_iter()
            .map(|entry| entry.path().to_string())
            .filter(|path| !path.ends_with('/'))
            .collect())
    }
}
