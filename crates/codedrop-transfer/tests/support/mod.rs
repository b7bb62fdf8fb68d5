//! Shared fixtures for transfer integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use codedrop_core::types::BLOB_PREFIX;
use codedrop_core::UploadPayload;
use codedrop_crypto::{seal, KdfParams, SealedFile};
use codedrop_storage::{
    memory_operator, BlobStream, OpendalStore, StoreError, StoreResult, TransferStore,
};
use codedrop_transfer::Clock;
use secrecy::SecretString;
use tokio::sync::Notify;

pub fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-10-19T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// A clock the test can move.
#[derive(Clone)]
pub struct TestClock(Arc<Mutex<DateTime<Utc>>>);

impl TestClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self(Arc::new(Mutex::new(now)))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.0.lock().unwrap() = now;
    }

    pub fn advance(&self, secs: i64) {
        let mut now = self.0.lock().unwrap();
        *now += TimeDelta::seconds(secs);
    }

    pub fn clock(&self) -> Clock {
        let inner = self.0.clone();
        Arc::new(move || *inner.lock().unwrap())
    }
}

pub fn fast_params() -> KdfParams {
    KdfParams { iterations: 1000 }
}

pub fn memory_store() -> Arc<OpendalStore> {
    Arc::new(OpendalStore::new(memory_operator().expect("memory operator")))
}

/// Seal `plaintext` under `code` and build the matching upload payload.
pub fn sealed_payload(
    code: &str,
    plaintext: &[u8],
    expires_at: DateTime<Utc>,
) -> (UploadPayload, SealedFile) {
    let sealed = seal(plaintext, &SecretString::from(code), &fast_params()).expect("seal");
    let payload = UploadPayload::from_sealed(
        code,
        "report.pdf",
        "application/pdf",
        plaintext.len() as u64,
        expires_at,
        &sealed,
    );
    (payload, sealed)
}

/// Wraps a real store and fails deletes of chosen keys.
pub struct FaultyStore {
    inner: OpendalStore,
    failing_deletes: Mutex<HashSet<String>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: OpendalStore::new(memory_operator().expect("memory operator")),
            failing_deletes: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_delete(&self, key: &str) {
        self.failing_deletes.lock().unwrap().insert(key.to_string());
    }

    pub fn heal(&self) {
        self.failing_deletes.lock().unwrap().clear();
    }
}

#[async_trait]
impl TransferStore for FaultyStore {
    async fn put_bytes(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> StoreResult<()> {
        self.inner.put_bytes(key, bytes, content_type).await
    }

    async fn get_bytes_stream(&self, key: &str) -> StoreResult<Option<BlobStream>> {
        self.inner.get_bytes_stream(key).await
    }

    async fn put_json(&self, key: &str, value: &serde_json::Value) -> StoreResult<()> {
        self.inner.put_json(key, value).await
    }

    async fn put_json_if_absent(&self, key: &str, value: &serde_json::Value) -> StoreResult<()> {
        self.inner.put_json_if_absent(key, value).await
    }

    async fn get_json(&self, key: &str) -> StoreResult<Option<serde_json::Value>> {
        self.inner.get_json(key).await
    }

    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        if self.failing_deletes.lock().unwrap().contains(key) {
            return Err(StoreError::Backend(opendal::Error::new(
                opendal::ErrorKind::Unexpected,
                "injected delete failure",
            )));
        }
        self.inner.delete_object(key).await
    }

    async fn list_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.inner.list_keys(prefix).await
    }
}

/// Wraps a real store and, once armed, parks the next ciphertext delete until
/// the test releases it.
pub struct GateStore {
    inner: OpendalStore,
    armed: AtomicBool,
    pub paused: Notify,
    pub release: Notify,
}

impl GateStore {
    pub fn new() -> Self {
        Self {
            inner: OpendalStore::new(memory_operator().expect("memory operator")),
            armed: AtomicBool::new(false),
            paused: Notify::new(),
            release: Notify::new(),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransferStore for GateStore {
    async fn put_bytes(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> StoreResult<()> {
        self.inner.put_bytes(key, bytes, content_type).await
    }

    async fn get_bytes_stream(&self, key: &str) -> StoreResult<Option<BlobStream>> {
        self.inner.get_bytes_stream(key).await
    }

    async fn put_json(&self, key: &str, value: &serde_json::Value) -> StoreResult<()> {
        self.inner.put_json(key, value).await
    }

    async fn put_json_if_absent(&self, key: &str, value: &serde_json::Value) -> StoreResult<()> {
        self.inner.put_json_if_absent(key, value).await
    }

    async fn get_json(&self, key: &str) -> StoreResult<Option<serde_json::Value>> {
        self.inner.get_json(key).await
    }

    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        if key.starts_with(BLOB_PREFIX) && self.armed.swap(false, Ordering::SeqCst) {
            self.paused.notify_one();
            self.release.notified().await;
        }
        self.inner.delete_object(key).await
    }

    async fn list_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.inner.list_keys(prefix).await
    }
}

/// Wraps a real store and yields to the scheduler around every step of a
/// conditional write, so concurrent creates interleave.
pub struct YieldingStore {
    inner: OpendalStore,
}

impl YieldingStore {
    pub fn new() -> Self {
        Self {
            inner: OpendalStore::new(memory_operator().expect("memory operator")),
        }
    }
}

#[async_trait]
impl TransferStore for YieldingStore {
    async fn put_bytes(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.inner.put_bytes(key, bytes, content_type).await
    }

    async fn get_bytes_stream(&self, key: &str) -> StoreResult<Option<BlobStream>> {
        self.inner.get_bytes_stream(key).await
    }

    async fn put_json(&self, key: &str, value: &serde_json::Value) -> StoreResult<()> {
        self.inner.put_json(key, value).await
    }

    async fn put_json_if_absent(&self, key: &str, value: &serde_json::Value) -> StoreResult<()> {
        // Stat, then give other creates a chance to run before the write.
        let _ = self.inner.get_json(key).await?;
        tokio::task::yield_now().await;
        self.inner.put_json_if_absent(key, value).await
    }

    async fn get_json(&self, key: &str) -> StoreResult<Option<serde_json::Value>> {
        let value = self.inner.get_json(key).await;
        tokio::task::yield_now().await;
        value
    }

    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        self.inner.delete_object(key).await
    }

    async fn list_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.inner.list_keys(prefix).await
    }
}
