//! Cross-terminal sync protocol messages.
//!
//! On the storage relay these are JSON-encoded as
//! `{"type": <string>, "payload": <object>}`; unit messages carry no
//! payload. The native transport moves them as plain structured values.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::TransactionId;

/// Messages exchanged between terminals of one storefront.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SyncMessage {
    /// The degraded-network simulation was toggled somewhere.
    ModeChanged { degraded: bool },

    /// A transaction record was durably written and is now in flight.
    TransactionStarted { id: TransactionId },

    /// A transaction settled and its record is gone.
    TransactionFinished { id: TransactionId },

    /// A newly opened terminal asking running peers for their state.
    WhoIsAlive,

    /// Reply to `WhoIsAlive`, sent only by terminals with something to
    /// report.
    StateSnapshot {
        degraded: bool,
        pending: BTreeSet<TransactionId>,
    },

    /// Wipe the whole storefront namespace and restart every terminal.
    ResetAll,
}

/// A received message plus the origin scope it arrived from.
///
/// The origin is stamped by the transport, never parsed off the wire;
/// handlers drop envelopes whose origin does not match their own scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub origin: String,
    pub message: SyncMessage,
}

impl Envelope {
    pub fn new(origin: impl Into<String>, message: SyncMessage) -> Self {
        Self {
            origin: origin.into(),
            message,
        }
    }
}
