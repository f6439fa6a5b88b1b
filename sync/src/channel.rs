//! Cross-terminal message transport.
//!
//! Terminals prefer the native broadcast channel; when joining it fails
//! (the host API is missing) they fall back to a storage relay: the message
//! is written under a well-known key of the shared medium and every other
//! terminal picks it up from its medium-change notifications. The writer
//! never hears its own relay write - the platform only notifies *other*
//! contexts - so both transports deliver strictly to peers.
//!
//! Relay sends while air-gapped land in the store's memory map and reach
//! nobody: cross-terminal sync silently degrades to single-terminal. That
//! silent drop is the intended behavior of the relay, not a defect.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use till_vault::{Attachment, RemoteWatch, ResilientStore, StorageMedium, StorageMode};
use tokio::sync::mpsc;

use crate::config::SyncConfig;
use crate::message::{Envelope, SyncMessage};
use crate::switchboard::{EnvelopeReceiver, NativeChannel, Switchboard};

/// The transport a terminal ended up with.
#[derive(Debug)]
pub enum Transport {
    Native(NativeChannel),
    Relay(RelayChannel),
}

impl Transport {
    /// Connect to the storefront's channel, native first, relay on failure.
    ///
    /// Must be called from within a Tokio runtime; the relay spawns its
    /// cleanup timers onto it.
    pub fn connect(
        switchboard: &Switchboard,
        store: &Arc<ResilientStore>,
        attachment: &Attachment,
        config: &SyncConfig,
    ) -> (Self, EnvelopeReceiver) {
        match switchboard.join(&config.channel_name) {
            Ok((native, receiver)) => (Transport::Native(native), receiver),
            Err(err) => {
                tracing::warn!(%err, "native channel failed, falling back to storage relay");
                let (relay, receiver) = RelayChannel::connect(store, attachment, config);
                (Transport::Relay(relay), receiver)
            }
        }
    }

    /// Fire-and-forget send to all other terminals. Transport failures are
    /// absorbed; there is no delivery guarantee beyond at-most-once.
    pub fn send(&self, message: &SyncMessage) {
        match self {
            Transport::Native(channel) => {
                channel.send(message);
            }
            Transport::Relay(channel) => channel.send(message),
        }
    }

    /// Tear the transport down. The receiver returned by
    /// [`connect`](Self::connect) ends once drained.
    pub fn close(&self) {
        match self {
            Transport::Native(channel) => channel.close(),
            Transport::Relay(channel) => channel.close(),
        }
    }

    pub fn is_relay(&self) -> bool {
        matches!(self, Transport::Relay(_))
    }
}

/// Cross-terminal messaging over the shared storage medium.
pub struct RelayChannel {
    store: Arc<ResilientStore>,
    cleaner: Attachment,
    relay_key: String,
    cleanup_after: Duration,
    watch: Mutex<Option<RemoteWatch>>,
}

impl RelayChannel {
    fn connect(
        store: &Arc<ResilientStore>,
        attachment: &Attachment,
        config: &SyncConfig,
    ) -> (Self, EnvelopeReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();

        let relay_key = config.channel_name.clone();
        let watch_key = relay_key.clone();
        let watch = attachment.on_remote_change(move |change| {
            if change.key != watch_key {
                return;
            }
            let Some(wire) = change.new_value.as_deref() else {
                // Cleanup removals are not messages.
                return;
            };
            match serde_json::from_str::<SyncMessage>(wire) {
                Ok(message) => {
                    let _ = sender.send(Envelope::new(change.scope.clone(), message));
                }
                Err(err) => {
                    tracing::debug!(%err, "dropping unparseable relay message");
                }
            }
        });

        (
            Self {
                store: Arc::clone(store),
                cleaner: attachment.clone(),
                relay_key,
                cleanup_after: config.relay_cleanup,
                watch: Mutex::new(Some(watch)),
            },
            receiver,
        )
    }

    /// Serialize and write the message under the relay key, then schedule
    /// the key's removal. Failures are absorbed: an air-gapped store keeps
    /// the write in memory where no peer can see it.
    fn send(&self, message: &SyncMessage) {
        let wire = match serde_json::to_string(message) {
            Ok(wire) => wire,
            Err(err) => {
                tracing::debug!(%err, "dropping unserializable relay message");
                return;
            }
        };

        self.store.set(&self.relay_key, &wire);

        // Clear the relay key so it neither grows stale nor replays to
        // late-joining terminals. Straight through the medium: the store
        // must not see this as a data mutation. Skipped while air-gapped,
        // where the medium copy does not exist.
        let store = Arc::clone(&self.store);
        let cleaner = self.cleaner.clone();
        let relay_key = self.relay_key.clone();
        let cleanup_after = self.cleanup_after;
        tokio::spawn(async move {
            tokio::time::sleep(cleanup_after).await;
            if store.mode() == StorageMode::Normal {
                let _ = cleaner.remove(&relay_key);
            }
        });
    }

    /// Stop listening. Pending cleanup timers still run.
    fn close(&self) {
        if let Ok(mut watch) = self.watch.lock() {
            watch.take();
        }
    }
}

impl std::fmt::Debug for RelayChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayChannel")
            .field("relay_key", &self.relay_key)
            .field("cleanup_after", &self.cleanup_after)
            .finish()
    }
}
