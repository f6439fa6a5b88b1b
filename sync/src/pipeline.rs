//! The write-announce-settle transaction flow.
//!
//! A sale is durable the moment [`TransactionPipeline::execute`] returns:
//! the sealed record is already under its own storage key. Everything
//! after that - the start announcement, the settle wait, the retirement -
//! runs on spawned timers and survives nothing. A terminal killed mid-flow
//! leaves the record behind, which is exactly what the recovery scan and
//! the batch purge exist to mop up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use till_vault::ResilientStore;

use crate::config::SyncConfig;
use crate::coordinator::SyncCoordinator;
use crate::crypto::{self, SealedRecord, SessionKey};
use crate::error::{Error, Result};
use crate::TransactionId;

/// Plaintext shape of a durable transaction record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub amount: f64,
    pub timestamp: String,
}

struct PipelineInner {
    store: Arc<ResilientStore>,
    coordinator: SyncCoordinator,
    config: SyncConfig,
    key: Mutex<Option<SessionKey>>,
    alive: AtomicBool,
}

/// Runs transactions through write, announce, and settle.
///
/// Cheap to clone; all clones share the session key and liveness flag.
#[derive(Clone)]
pub struct TransactionPipeline {
    inner: Arc<PipelineInner>,
}

impl TransactionPipeline {
    pub fn new(
        store: Arc<ResilientStore>,
        coordinator: SyncCoordinator,
        config: SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                store,
                coordinator,
                config,
                key: Mutex::new(None),
                alive: AtomicBool::new(true),
            }),
        }
    }

    /// Run one transaction.
    ///
    /// Seals the record and writes it durably before returning; the id in
    /// the `Ok` is already recoverable by any terminal on the medium. The
    /// start announcement fires after the scramble gate, and if the
    /// storefront is not degraded at that moment, the settle timer retires
    /// the record and announces the finish.
    ///
    /// `label` is the human-facing display string for the sale. It shows
    /// up in the logs and nowhere else; the sealed record carries only the
    /// raw amount.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn execute(&self, amount: f64, label: &str) -> Result<TransactionId> {
        if !self.inner.alive.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        let now = Utc::now();
        // Millisecond clock plus a random tail keeps ids unique across
        // terminals without any coordination.
        let id = now.timestamp_millis() as TransactionId * 100_000
            + rand::thread_rng().gen_range(0..100_000);

        let record = TransactionRecord {
            id,
            amount,
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        };

        let sealed = crypto::seal(&self.session_key()?, &record)?;
        let wire = serde_json::to_string(&sealed).map_err(|e| Error::Encryption(e.to_string()))?;
        self.inner.store.set(&self.inner.config.record_key(id), &wire);
        tracing::info!(id, amount, label, "transaction record written");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.config.scramble_gate).await;
            if !inner.alive.load(Ordering::SeqCst) {
                return;
            }
            inner.coordinator.announce_start(id);

            // Checked once, here. A degraded storefront parks the
            // transaction: the record and the pending id linger until the
            // batch purge on recovery.
            if inner.coordinator.degraded() {
                tracing::debug!(id, "transaction parked until degraded mode lifts");
                return;
            }

            tokio::time::sleep(inner.config.settle_delay).await;
            if !inner.alive.load(Ordering::SeqCst) {
                return;
            }
            inner.store.remove(&inner.config.record_key(id));
            inner.coordinator.announce_finish(id);
            tracing::debug!(id, "transaction settled");
        });

        Ok(id)
    }

    /// Fetch the sealed at-rest form of a record, if it still exists.
    pub fn sealed_record(&self, id: TransactionId) -> Option<SealedRecord> {
        let wire = self.inner.store.get(&self.inner.config.record_key(id))?;
        serde_json::from_str(&wire).ok()
    }

    /// Stop accepting transactions and abandon in-flight timers at their
    /// next liveness check. Durable records are left in place.
    pub fn close(&self) {
        self.inner.alive.store(false, Ordering::SeqCst);
    }

    /// One key per terminal session, generated on first use.
    fn session_key(&self) -> Result<SessionKey> {
        let mut slot = self
            .inner
            .key
            .lock()
            .map_err(|_| Error::Encryption("session key unavailable".into()))?;
        Ok(slot.get_or_insert_with(SessionKey::generate).clone())
    }
}

impl std::fmt::Debug for TransactionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionPipeline")
            .field("alive", &self.inner.alive.load(Ordering::SeqCst))
            .finish()
    }
}
