//! # Till Sync
//!
//! Cross-terminal synchronization for point-of-sale storefronts.
//!
//! This crate runs the live side of a till: encrypted transaction records,
//! a write-announce-settle pipeline, and a shared-state protocol that keeps
//! every terminal of a storefront agreeing on the degraded-network flag and
//! the set of in-flight transactions. Storage resilience comes from
//! [`till_vault`]; this crate adds the moving parts.
//!
//! ## Design Principles
//!
//! - **Durability first**: A transaction is on the medium before any peer
//!   hears about it. Announcements are best-effort; the record is not.
//! - **No authority**: No terminal owns the shared state. Idempotent adds
//!   and removes plus set-union snapshot merges make arrival order
//!   irrelevant.
//! - **Transport agnostic**: Terminals talk over the native switchboard
//!   channel when the host provides one, and fall back to relaying
//!   messages through the storage medium itself when it does not.
//! - **Crash friendly**: A terminal killed mid-flow leaves its sealed
//!   record behind; the startup recovery scan and the batch purge on
//!   leaving degraded mode mop up.
//!
//! ## Core Concepts
//!
//! ### Storefronts and terminals
//!
//! A [`Storefront`] is one shop: a shared storage medium and a switchboard
//! under one origin. [`Storefront::open`] wires a [`Terminal`] on top -
//! resilient store, transport, coordinator, pipeline.
//!
//! ### The transaction pipeline
//!
//! [`TransactionPipeline::execute`] seals the record with the terminal's
//! session key, writes it durably, and returns. Timers then announce the
//! start, wait out the settle delay, and retire the record - unless the
//! storefront is degraded, in which case the transaction parks until
//! recovery.
//!
//! ### The sync protocol
//!
//! Six messages, JSON on the wire: `mode_changed`, `transaction_started`,
//! `transaction_finished`, `who_is_alive`, `state_snapshot`, `reset_all`.
//! A terminal joining late asks `who_is_alive` and adopts whatever
//! snapshot comes back.
//!
//! ### Sealed records
//!
//! At-rest records are AES-256-GCM sealed under a per-session key and
//! stored as `{"iv": [...], "data": [...]}` JSON.
//!
//! ## Quick Start
//!
//! ```rust
//! use till_sync::{Storefront, SyncConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let shop = Storefront::new(SyncConfig::default());
//! let till = shop.open("till-1");
//!
//! // Durable the moment execute returns.
//! let id = till.execute_transaction(4.20, "espresso").unwrap();
//! assert!(till.sealed_record(id).is_some());
//!
//! till.close();
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod coordinator;
pub mod crypto;
pub mod error;
pub mod message;
pub mod pipeline;
pub mod switchboard;
pub mod terminal;

// Re-export main types at crate root
pub use channel::{RelayChannel, Transport};
pub use config::{ConfigError, SyncConfig};
pub use coordinator::{ResetNotice, StateUpdate, SyncCoordinator};
pub use crypto::{open, seal, SealedRecord, SessionKey, IV_LENGTH};
pub use error::{Error, Result};
pub use message::{Envelope, SyncMessage};
pub use pipeline::{TransactionPipeline, TransactionRecord};
pub use switchboard::{EnvelopeReceiver, EnvelopeSender, NativeChannel, Switchboard};
pub use terminal::{Storefront, Terminal};

/// Transaction ids embed the wall clock: `millis * 100_000 + random`.
pub type TransactionId = u64;
