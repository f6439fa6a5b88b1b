//! Shared-state reconciliation across terminals.
//!
//! Every terminal owns a copy of the shared state - the degraded-network
//! flag and the set of in-flight transaction ids - and converges with its
//! peers through the message protocol: idempotent add/remove for single
//! transactions, set-union merges for snapshots, and a one-shot
//! `WhoIsAlive` query at startup so a late terminal adopts the state of
//! whoever is already running. Nobody is authoritative; the merge rules
//! make the order of arrival irrelevant.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use till_vault::{Notifier, ResilientStore, StorageMode, Subscription};

use crate::channel::Transport;
use crate::config::SyncConfig;
use crate::message::{Envelope, SyncMessage};
use crate::switchboard::EnvelopeReceiver;
use crate::TransactionId;

/// Snapshot published to observers after every state mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateUpdate {
    pub degraded: bool,
    pub pending_count: usize,
}

/// Published when a global reset has wiped the storefront namespace; the
/// embedder is expected to restart the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetNotice;

#[derive(Debug, Default)]
struct SyncState {
    degraded: bool,
    pending: BTreeSet<TransactionId>,
}

impl SyncState {
    fn update(&self) -> StateUpdate {
        StateUpdate {
            degraded: self.degraded,
            pending_count: self.pending.len(),
        }
    }
}

struct CoordinatorInner {
    origin: String,
    config: SyncConfig,
    store: Arc<ResilientStore>,
    transport: Transport,
    state: Mutex<SyncState>,
    updates: Notifier<StateUpdate>,
    resets: Notifier<ResetNotice>,
}

impl CoordinatorInner {
    fn handle(&self, envelope: Envelope) {
        // Origin-scoped transports should make this impossible; the check
        // stays explicit against relay spoofing. An empty origin is the
        // transport declining to say, which is accepted.
        if !envelope.origin.is_empty() && envelope.origin != self.origin {
            tracing::debug!(origin = %envelope.origin, "dropping envelope from foreign origin");
            return;
        }

        match envelope.message {
            SyncMessage::ModeChanged { degraded } => {
                let update = {
                    let Ok(mut state) = self.state.lock() else {
                        return;
                    };
                    state.degraded = degraded;
                    if !degraded {
                        // The initiator already purged the durable records;
                        // peers only forget the ids.
                        state.pending.clear();
                    }
                    state.update()
                };
                tracing::info!(degraded, "adopted mode change from peer");
                self.updates.publish(&update);
            }
            SyncMessage::TransactionStarted { id } => {
                let update = {
                    let Ok(mut state) = self.state.lock() else {
                        return;
                    };
                    state.pending.insert(id);
                    state.update()
                };
                self.updates.publish(&update);
            }
            SyncMessage::TransactionFinished { id } => {
                let update = {
                    let Ok(mut state) = self.state.lock() else {
                        return;
                    };
                    state.pending.remove(&id);
                    state.update()
                };
                self.updates.publish(&update);
            }
            SyncMessage::WhoIsAlive => {
                let reply = {
                    let Ok(state) = self.state.lock() else {
                        return;
                    };
                    (!state.pending.is_empty() || state.degraded).then(|| {
                        SyncMessage::StateSnapshot {
                            degraded: state.degraded,
                            pending: state.pending.clone(),
                        }
                    })
                };
                // Nothing to report means no reply: a fresh storefront
                // stays quiet instead of echoing empty snapshots around.
                if let Some(snapshot) = reply {
                    tracing::debug!("answering liveness query with state snapshot");
                    self.transport.send(&snapshot);
                }
            }
            SyncMessage::StateSnapshot { degraded, pending } => {
                let update = {
                    let Ok(mut state) = self.state.lock() else {
                        return;
                    };
                    state.degraded = degraded;
                    // Union, never replace: a stale snapshot must not drop
                    // ids this terminal already knows about.
                    state.pending.extend(pending);
                    state.update()
                };
                tracing::info!(
                    degraded,
                    pending = update.pending_count,
                    "merged state snapshot from peer"
                );
                self.updates.publish(&update);
            }
            SyncMessage::ResetAll => {
                tracing::warn!("global reset requested by peer, wiping storefront namespace");
                self.store.clear_all();
                self.resets.publish(&ResetNotice);
            }
        }
    }
}

/// One terminal's view of the shared storefront state.
///
/// Cheap to clone; all clones drive the same state.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl SyncCoordinator {
    /// Bring a coordinator up over an already-connected transport.
    ///
    /// Seeds the pending set from durable records that survived a previous
    /// run, spawns the inbound loop, and broadcasts exactly one
    /// `WhoIsAlive`. No reply simply means this is the first terminal.
    pub fn start(
        store: Arc<ResilientStore>,
        transport: Transport,
        receiver: EnvelopeReceiver,
        config: SyncConfig,
    ) -> Self {
        let mut state = SyncState::default();
        if store.mode() == StorageMode::Normal {
            for key in store.keys_with_prefix(&config.record_prefix) {
                if let Ok(id) = key[config.record_prefix.len()..].parse::<TransactionId>() {
                    state.pending.insert(id);
                }
            }
            if !state.pending.is_empty() {
                tracing::info!(
                    recovered = state.pending.len(),
                    "recovered in-flight transactions from durable records"
                );
            }
        }

        let inner = Arc::new(CoordinatorInner {
            origin: config.origin.clone(),
            config,
            store,
            transport,
            state: Mutex::new(state),
            updates: Notifier::new(),
            resets: Notifier::new(),
        });

        let inbound = Arc::clone(&inner);
        tokio::spawn(async move {
            let mut receiver = receiver;
            while let Some(envelope) = receiver.recv().await {
                inbound.handle(envelope);
            }
            tracing::trace!("sync inbound loop ended");
        });

        inner.transport.send(&SyncMessage::WhoIsAlive);

        Self { inner }
    }

    /// Flip the degraded-network simulation locally and tell every peer.
    ///
    /// Leaving degraded mode performs the batch purge first: the durable
    /// record of every pending transaction is deleted, then the set is
    /// cleared, then the change is broadcast.
    pub fn set_degraded(&self, degraded: bool) {
        let (purged, update) = {
            let Ok(mut state) = self.inner.state.lock() else {
                return;
            };
            state.degraded = degraded;
            let purged: Vec<TransactionId> = if degraded {
                Vec::new()
            } else {
                let ids = state.pending.iter().copied().collect();
                state.pending.clear();
                ids
            };
            (purged, state.update())
        };

        if !purged.is_empty() {
            tracing::info!(count = purged.len(), "batch-purging settled transaction records");
            for id in &purged {
                self.inner.store.remove(&self.inner.config.record_key(*id));
            }
        }

        self.inner
            .transport
            .send(&SyncMessage::ModeChanged { degraded });
        self.inner.updates.publish(&update);
    }

    /// Record a freshly written transaction as in flight, here and on
    /// every peer. Idempotent.
    pub fn announce_start(&self, id: TransactionId) {
        let update = {
            let Ok(mut state) = self.inner.state.lock() else {
                return;
            };
            state.pending.insert(id);
            state.update()
        };
        self.inner
            .transport
            .send(&SyncMessage::TransactionStarted { id });
        self.inner.updates.publish(&update);
    }

    /// Retire a settled transaction, here and on every peer. Idempotent.
    pub fn announce_finish(&self, id: TransactionId) {
        let update = {
            let Ok(mut state) = self.inner.state.lock() else {
                return;
            };
            state.pending.remove(&id);
            state.update()
        };
        self.inner
            .transport
            .send(&SyncMessage::TransactionFinished { id });
        self.inner.updates.publish(&update);
    }

    /// Wipe the whole storefront namespace, on every terminal.
    ///
    /// Destructive beyond this subsystem's own keys. Peers are told first,
    /// then the local namespace is cleared and the reset notice published.
    pub fn request_global_reset(&self) {
        tracing::warn!("broadcasting global reset");
        self.inner.transport.send(&SyncMessage::ResetAll);
        self.inner.store.clear_all();
        self.inner.resets.publish(&ResetNotice);
    }

    pub fn degraded(&self) -> bool {
        self.inner
            .state
            .lock()
            .map(|state| state.degraded)
            .unwrap_or(false)
    }

    pub fn pending_ids(&self) -> BTreeSet<TransactionId> {
        self.inner
            .state
            .lock()
            .map(|state| state.pending.clone())
            .unwrap_or_default()
    }

    pub fn pending_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .map(|state| state.pending.len())
            .unwrap_or(0)
    }

    /// Observe every state mutation. Fires after the mutation landed.
    pub fn on_update(
        &self,
        listener: impl Fn(&StateUpdate) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.updates.subscribe(listener)
    }

    /// Observe global resets applied on this terminal.
    pub fn on_reset(
        &self,
        listener: impl Fn(&ResetNotice) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.resets.subscribe(listener)
    }

    /// Tear down the transport; the inbound loop ends once its queue
    /// drains.
    pub fn close(&self) {
        self.inner.transport.close();
    }
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("origin", &self.inner.origin)
            .field("degraded", &self.degraded())
            .field("pending", &self.pending_count())
            .finish()
    }
}
