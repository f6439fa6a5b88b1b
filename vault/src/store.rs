//! The resilient store - a storage facade that never fails its caller.
//!
//! Probes the persistent medium once at construction, then absorbs every
//! later medium failure by flipping (one way) into air-gapped mode and
//! serving an in-memory map for the rest of the process lifetime. Callers
//! see plain `set`/`get`/`remove` that always succeed; the degradation is
//! observable only through [`mode`](ResilientStore::mode), the air-gap
//! alert, and the `airGapped` flag on every change event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::event::{AirGapAlert, AlertTrigger, ChangeEvent, Origin};
use crate::medium::StorageMedium;
use crate::notify::{Notifier, Subscription};

const PROBE_KEY: &str = "__till_probe__";

/// Which medium currently backs the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageMode {
    /// The persistent medium is healthy and authoritative
    Normal,
    /// The persistent medium has failed; an in-memory map is authoritative
    /// for the rest of this instance's lifetime
    AirGapped,
}

/// Read-only diagnostics for one store instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub mode: StorageMode,
    /// Keys currently held in the in-memory fallback map
    pub memory_item_count: usize,
    /// Data operations attempted through this store
    pub total_ops: u64,
    /// Medium operations that failed and were absorbed
    pub failed_ops: u64,
    /// When the construction probe ran, milliseconds since the Unix epoch
    pub last_probe_ms: u64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Key-value storage that degrades instead of failing.
///
/// Medium failures never surface to callers: a failed write flips the store
/// into [`StorageMode::AirGapped`] (exactly once, one way) and lands in the
/// in-memory map; failed reads and removals fall back without flipping.
/// Every successful mutation is announced on the change notifier, including
/// the synthetic local event the platform medium does not provide for the
/// writing context itself.
pub struct ResilientStore {
    medium: Box<dyn StorageMedium>,
    memory: RwLock<HashMap<String, String>>,
    air_gapped: AtomicBool,
    changes: Notifier<ChangeEvent>,
    alerts: Notifier<AirGapAlert>,
    total_ops: AtomicU64,
    failed_ops: AtomicU64,
    last_probe_ms: u64,
}

impl ResilientStore {
    /// Build a store over `medium`, probing it once.
    ///
    /// A failed probe puts the instance in air-gapped mode from the start;
    /// it never retries.
    pub fn new(medium: Box<dyn StorageMedium>) -> Self {
        let store = Self {
            medium,
            memory: RwLock::new(HashMap::new()),
            air_gapped: AtomicBool::new(false),
            changes: Notifier::new(),
            alerts: Notifier::new(),
            total_ops: AtomicU64::new(0),
            failed_ops: AtomicU64::new(0),
            last_probe_ms: now_ms(),
        };
        store.probe();
        store
    }

    /// Convenience constructor for the common shared-ownership case.
    pub fn new_shared(medium: Box<dyn StorageMedium>) -> Arc<Self> {
        Arc::new(Self::new(medium))
    }

    fn probe(&self) {
        let outcome = self
            .medium
            .set(PROBE_KEY, "1")
            .and_then(|()| self.medium.remove(PROBE_KEY));
        if let Err(err) = outcome {
            self.failed_ops.fetch_add(1, Ordering::Relaxed);
            self.trip_air_gap(AlertTrigger::Probe, &err.to_string());
        }
    }

    /// Flip into air-gapped mode. The compare-exchange guarantees the alert
    /// fires exactly once per instance no matter how many writes fail.
    fn trip_air_gap(&self, trigger: AlertTrigger, reason: &str) {
        if self
            .air_gapped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::warn!(?trigger, reason, "persistent medium lost, air-gapped");
            self.alerts.publish(&AirGapAlert {
                trigger,
                at_ms: now_ms(),
            });
        }
    }

    fn is_air_gapped(&self) -> bool {
        self.air_gapped.load(Ordering::Acquire)
    }

    /// Current operating mode.
    pub fn mode(&self) -> StorageMode {
        if self.is_air_gapped() {
            StorageMode::AirGapped
        } else {
            StorageMode::Normal
        }
    }

    /// Write a value. Never fails.
    ///
    /// In `Normal` mode a medium failure flips the store into air-gapped
    /// mode and the value lands in memory instead. Exactly one local
    /// [`ChangeEvent`] is published per call, after the write landed.
    pub fn set(&self, key: &str, value: &str) {
        self.total_ops.fetch_add(1, Ordering::Relaxed);

        if !self.is_air_gapped() {
            match self.medium.set(key, value) {
                Ok(()) => {
                    self.publish_local(key, Some(value.to_owned()));
                    return;
                }
                Err(err) => {
                    self.failed_ops.fetch_add(1, Ordering::Relaxed);
                    self.trip_air_gap(AlertTrigger::Write, &err.to_string());
                }
            }
        }

        if let Ok(mut memory) = self.memory.write() {
            memory.insert(key.to_owned(), value.to_owned());
        }
        self.publish_local(key, Some(value.to_owned()));
    }

    /// Read a value from whichever medium is authoritative.
    ///
    /// An unexpected medium read failure falls back to the memory map and
    /// does not change the mode.
    pub fn get(&self, key: &str) -> Option<String> {
        self.total_ops.fetch_add(1, Ordering::Relaxed);

        if self.is_air_gapped() {
            return self.memory_get(key);
        }
        match self.medium.get(key) {
            Ok(value) => value,
            Err(err) => {
                self.failed_ops.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key, %err, "medium read failed, serving memory fallback");
                self.memory_get(key)
            }
        }
    }

    /// Remove a key. Never fails; a medium failure is absorbed and the
    /// removal is applied to the memory map instead, without a mode flip.
    pub fn remove(&self, key: &str) {
        self.total_ops.fetch_add(1, Ordering::Relaxed);

        if self.is_air_gapped() {
            self.memory_remove(key);
        } else if let Err(err) = self.medium.remove(key) {
            self.failed_ops.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key, %err, "medium remove failed, applying to memory fallback");
            self.memory_remove(key);
        }
        self.publish_local(key, None);
    }

    /// Keys starting with `prefix` in the authoritative medium.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.total_ops.fetch_add(1, Ordering::Relaxed);

        let mut keys = if self.is_air_gapped() {
            self.memory_keys()
        } else {
            match self.medium.keys() {
                Ok(keys) => keys,
                Err(err) => {
                    self.failed_ops.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(%err, "medium key scan failed, serving memory fallback");
                    self.memory_keys()
                }
            }
        };
        keys.retain(|key| key.starts_with(prefix));
        keys.sort();
        keys
    }

    /// Wipe the entire persistent namespace and the memory map.
    ///
    /// Destructive beyond this subsystem's own keys: every key in the
    /// medium goes, whoever wrote it. Publishes no per-key events; callers
    /// restart their context afterwards.
    pub fn clear_all(&self) {
        self.total_ops.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = self.medium.clear() {
            self.failed_ops.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%err, "medium clear failed");
        }
        if let Ok(mut memory) = self.memory.write() {
            memory.clear();
        }
    }

    /// Re-announce a mutation observed from another terminal through this
    /// store's notifier, tagged [`Origin::Remote`].
    pub fn publish_remote(&self, key: &str, new_value: Option<String>) {
        self.changes
            .publish(&ChangeEvent::remote(key, new_value, self.is_air_gapped()));
    }

    /// Listen to every change event from this store.
    pub fn subscribe(&self, listener: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> Subscription {
        self.changes.subscribe(listener)
    }

    /// Listen to change events whose key starts with `prefix`.
    pub fn watch_prefix(
        &self,
        prefix: impl Into<String>,
        listener: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let prefix = prefix.into();
        self.changes.subscribe(move |event: &ChangeEvent| {
            if event.key.starts_with(&prefix) {
                listener(event);
            }
        })
    }

    /// Listen for the air-gap transition. Fires at most once per instance;
    /// a listener attached after the transition gets nothing and should
    /// consult [`mode`](Self::mode) instead.
    pub fn on_air_gap(
        &self,
        listener: impl Fn(&AirGapAlert) + Send + Sync + 'static,
    ) -> Subscription {
        self.alerts.subscribe(listener)
    }

    /// Read-only diagnostics snapshot.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            mode: self.mode(),
            memory_item_count: self.memory.read().map(|memory| memory.len()).unwrap_or(0),
            total_ops: self.total_ops.load(Ordering::Relaxed),
            failed_ops: self.failed_ops.load(Ordering::Relaxed),
            last_probe_ms: self.last_probe_ms,
        }
    }

    fn publish_local(&self, key: &str, new_value: Option<String>) {
        self.changes.publish(&ChangeEvent {
            key: key.to_owned(),
            new_value,
            air_gapped: self.is_air_gapped(),
            origin: Origin::Local,
        });
    }

    fn memory_get(&self, key: &str) -> Option<String> {
        self.memory
            .read()
            .ok()
            .and_then(|memory| memory.get(key).cloned())
    }

    fn memory_remove(&self, key: &str) {
        if let Ok(mut memory) = self.memory.write() {
            memory.remove(key);
        }
    }

    fn memory_keys(&self) -> Vec<String> {
        self.memory
            .read()
            .map(|memory| memory.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for ResilientStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientStore")
            .field("mode", &self.mode())
            .field("total_ops", &self.total_ops.load(Ordering::Relaxed))
            .field("failed_ops", &self.failed_ops.load(Ordering::Relaxed))
            .finish()
    }
}
