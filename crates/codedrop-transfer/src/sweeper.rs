//! Retention sweeper: delete expired transfers and their ciphertext
//!
//! Per-record failures are counted and logged, never fatal for the sweep.
//! Sweeps hold no locks; concurrent sweeps may duplicate deletes, which the
//! store treats as success.
//!
//! A create may reclaim an expired code while a sweep is working on it, so
//! metadata is re-read right before its delete and left alone unless it still
//! names the same object and is still expired.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use codedrop_core::types::META_PREFIX;
use codedrop_core::{TransferError, TransferRecord, TransferResult};
use codedrop_storage::TransferStore;

use crate::lifecycle::{system_clock, Clock};

/// Delete an expired record's ciphertext, then its metadata at `meta` if that
/// key still holds the same object and it is still expired.
///
/// Returns `false` when the metadata was replaced or removed in between; the
/// ciphertext is still gone, since object ids are never reused.
pub(crate) async fn remove_if_current(
    store: &dyn TransferStore,
    meta: &str,
    record: &TransferRecord,
    clock: &Clock,
) -> TransferResult<bool> {
    store
        .delete_object(&record.blob_location)
        .await
        .map_err(TransferError::storage)?;

    let Some(value) = store.get_json(meta).await.map_err(TransferError::storage)? else {
        return Ok(false);
    };
    let current: TransferRecord = serde_json::from_value(value)
        .map_err(|e| TransferError::Storage(format!("corrupt transfer record: {e}")))?;
    if current.id != record.id || current.is_live(clock()) {
        debug!(
            object_id = %record.id,
            replaced_by = %current.id,
            "metadata replaced since read, leaving it"
        );
        return Ok(false);
    }

    store
        .delete_object(meta)
        .await
        .map_err(TransferError::storage)?;
    Ok(true)
}

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Metadata keys listed
    pub checked: usize,
    /// Expired transfers removed
    pub deleted: usize,
    /// Keys that could not be read, parsed, or deleted
    pub failed: usize,
}

enum Outcome {
    Deleted,
    Live,
    Vanished,
    Replaced,
}

/// Called with every completed sweep's report.
pub type ReportHook = Arc<dyn Fn(&SweepReport) + Send + Sync>;

#[derive(Clone)]
pub struct RetentionSweeper {
    store: Arc<dyn TransferStore>,
    clock: Clock,
    on_report: Option<ReportHook>,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn TransferStore>) -> Self {
        Self {
            store,
            clock: system_clock(),
            on_report: None,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_report_hook(mut self, hook: ReportHook) -> Self {
        self.on_report = Some(hook);
        self
    }

    /// Scan every metadata record and delete ciphertext + metadata for each
    /// one with `expires_at <= now`, fetched or not.
    ///
    /// Only a failure to list the metadata prefix aborts the sweep.
    pub async fn purge_expired(&self) -> TransferResult<SweepReport> {
        let keys = self
            .store
            .list_keys(META_PREFIX)
            .await
            .map_err(TransferError::storage)?;

        let mut report = SweepReport {
            checked: keys.len(),
            ..Default::default()
        };

        for key in keys.iter().filter(|k| k.ends_with(".json")) {
            match self.sweep_one(key).await {
                Ok(Outcome::Deleted) => report.deleted += 1,
                Ok(Outcome::Live | Outcome::Vanished | Outcome::Replaced) => {}
                Err(e) => {
                    warn!(key = %key, "sweep failed for record: {e}");
                    report.failed += 1;
                }
            }
        }

        info!(
            checked = report.checked,
            deleted = report.deleted,
            failed = report.failed,
            "retention sweep complete"
        );
        if let Some(hook) = &self.on_report {
            hook(&report);
        }
        Ok(report)
    }

    async fn sweep_one(&self, key: &str) -> TransferResult<Outcome> {
        let Some(value) = self
            .store
            .get_json(key)
            .await
            .map_err(TransferError::storage)?
        else {
            // Removed by a concurrent sweep between list and read.
            return Ok(Outcome::Vanished);
        };
        let record: TransferRecord = serde_json::from_value(value)
            .map_err(|e| TransferError::Storage(format!("corrupt transfer record: {e}")))?;

        if record.is_live((self.clock)()) {
            return Ok(Outcome::Live);
        }

        // Blob first: if the metadata delete then fails, the next sweep
        // retries it and the blob delete is a no-op.
        if !remove_if_current(self.store.as_ref(), key, &record, &self.clock).await? {
            return Ok(Outcome::Replaced);
        }

        debug!(object_id = %record.id, "expired transfer removed");
        Ok(Outcome::Deleted)
    }

    /// Sweep every `interval` until `shutdown` fires. The first sweep runs
    /// immediately.
    pub async fn run_periodic(&self, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(interval_secs = interval.as_secs(), "retention sweeper started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("retention sweeper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.purge_expired().await {
                        error!("retention sweep aborted: {e}");
                    }
                }
            }
        }
    }
}
