//! Storefront and terminal assembly.
//!
//! A [`Storefront`] is the shared world of one shop: the storage medium
//! and the switchboard, both scoped to one origin. [`Storefront::open`]
//! wires a full terminal on top of them - store, transport, coordinator,
//! pipeline - in the order a browser tab would bring them up.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use till_vault::{
    AirGapAlert, ChangeEvent, RemoteWatch, ResilientStore, SharedMedium, StoreStats, Subscription,
};

use crate::channel::Transport;
use crate::config::SyncConfig;
use crate::coordinator::{ResetNotice, StateUpdate, SyncCoordinator};
use crate::crypto::SealedRecord;
use crate::error::Result;
use crate::pipeline::TransactionPipeline;
use crate::switchboard::Switchboard;
use crate::TransactionId;

/// One shop: a storage medium and a switchboard under a single origin.
pub struct Storefront {
    medium: SharedMedium,
    switchboard: Switchboard,
    config: SyncConfig,
}

impl Storefront {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            medium: SharedMedium::new(&config.origin),
            switchboard: Switchboard::new(&config.origin),
            config,
        }
    }

    pub fn origin(&self) -> &str {
        &self.config.origin
    }

    pub fn medium(&self) -> &SharedMedium {
        &self.medium
    }

    pub fn switchboard(&self) -> &Switchboard {
        &self.switchboard
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Bring a terminal up on this storefront.
    ///
    /// Attaches to the medium, probes storage, starts observing peer
    /// mutations, connects the transport (native first, relay fallback)
    /// and joins the sync protocol. Must be called from within a Tokio
    /// runtime.
    pub fn open(&self, label: impl Into<String>) -> Terminal {
        let label = label.into();
        let attachment = self.medium.attach(&label);
        let store = ResilientStore::new_shared(Box::new(attachment.clone()));

        // Mutations by other terminals surface as remote change events on
        // this store. The channel key carries transport traffic, not
        // domain state, and is kept out of the notification plane.
        let republish = Arc::downgrade(&store);
        let channel_key = self.config.channel_name.clone();
        let watch = attachment.on_remote_change(move |change| {
            if change.key == channel_key {
                return;
            }
            if let Some(store) = republish.upgrade() {
                store.publish_remote(&change.key, change.new_value.clone());
            }
        });

        let (transport, receiver) =
            Transport::connect(&self.switchboard, &store, &attachment, &self.config);
        let coordinator = SyncCoordinator::start(
            Arc::clone(&store),
            transport,
            receiver,
            self.config.clone(),
        );
        let pipeline =
            TransactionPipeline::new(Arc::clone(&store), coordinator.clone(), self.config.clone());

        tracing::info!(%label, origin = %self.config.origin, "terminal open");

        Terminal {
            label,
            store,
            coordinator,
            pipeline,
            watch: Mutex::new(Some(watch)),
            closed: AtomicBool::new(false),
        }
    }
}

impl std::fmt::Debug for Storefront {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storefront")
            .field("origin", &self.config.origin)
            .finish()
    }
}

/// One running terminal: resilient storage plus live sync with its peers.
pub struct Terminal {
    label: String,
    store: Arc<ResilientStore>,
    coordinator: SyncCoordinator,
    pipeline: TransactionPipeline,
    watch: Mutex<Option<RemoteWatch>>,
    closed: AtomicBool,
}

impl Terminal {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run one transaction through write, announce, and settle. `label`
    /// is the display string for the sale, logged but never persisted.
    pub fn execute_transaction(&self, amount: f64, label: &str) -> Result<TransactionId> {
        self.pipeline.execute(amount, label)
    }

    /// Toggle the degraded-network simulation for the whole storefront.
    pub fn set_degraded(&self, degraded: bool) {
        self.coordinator.set_degraded(degraded);
    }

    pub fn degraded(&self) -> bool {
        self.coordinator.degraded()
    }

    pub fn pending_ids(&self) -> BTreeSet<TransactionId> {
        self.coordinator.pending_ids()
    }

    pub fn pending_count(&self) -> usize {
        self.coordinator.pending_count()
    }

    /// The underlying store, for reads, writes and subscriptions.
    pub fn store(&self) -> &Arc<ResilientStore> {
        &self.store
    }

    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    /// The sealed at-rest form of a transaction record, if it still
    /// exists.
    pub fn sealed_record(&self, id: TransactionId) -> Option<SealedRecord> {
        self.pipeline.sealed_record(id)
    }

    /// Wipe the storefront namespace on every terminal.
    pub fn request_global_reset(&self) {
        self.coordinator.request_global_reset();
    }

    /// Observe shared-state changes (degraded flag, pending count).
    pub fn on_update(
        &self,
        listener: impl Fn(&StateUpdate) + Send + Sync + 'static,
    ) -> Subscription {
        self.coordinator.on_update(listener)
    }

    /// Observe global resets applied on this terminal.
    pub fn on_reset(
        &self,
        listener: impl Fn(&ResetNotice) + Send + Sync + 'static,
    ) -> Subscription {
        self.coordinator.on_reset(listener)
    }

    /// Observe every change event on this terminal's store.
    pub fn subscribe(
        &self,
        listener: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.store.subscribe(listener)
    }

    /// Observe the one-way flip into air-gapped mode.
    pub fn on_air_gap(
        &self,
        listener: impl Fn(&AirGapAlert) + Send + Sync + 'static,
    ) -> Subscription {
        self.store.on_air_gap(listener)
    }

    /// Shut the terminal down: refuse new transactions, abandon in-flight
    /// timers, leave the channel, stop observing peers. Idempotent;
    /// durable records stay behind for recovery.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pipeline.close();
        self.coordinator.close();
        if let Ok(mut watch) = self.watch.lock() {
            watch.take();
        }
        tracing::info!(label = %self.label, "terminal closed");
    }
}

impl std::fmt::Debug for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminal")
            .field("label", &self.label)
            .field("mode", &self.store.mode())
            .field("degraded", &self.degraded())
            .field("pending", &self.pending_count())
            .finish()
    }
}
