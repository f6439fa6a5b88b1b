//! # Till Vault
//!
//! A resilient key-value storage core for point-of-sale terminals.
//!
//! This crate provides the persistence layer for terminals that must keep
//! working inside a hostile host environment: restricted private-mode
//! contexts, storage quotas that exhaust mid-shift, flaky backends. The
//! central piece is [`ResilientStore`], a facade that silently degrades
//! from durable storage to an in-memory fallback instead of surfacing
//! errors to the selling flow.
//!
//! ## Design Principles
//!
//! - **Never fail the caller**: every medium failure becomes a mode
//!   transition or a fallback action, not an error
//! - **One-way degradation**: once air-gapped, an instance stays air-gapped
//!   for its lifetime; there is no automatic recovery
//! - **Observable, not chatty**: one change event per mutation, one alert
//!   per degradation, read-only stats for everything else
//! - **No runtime**: plain synchronous calls, usable from any executor
//!
//! ## Core Concepts
//!
//! ### Media
//!
//! A [`StorageMedium`] is the fallible persistent layer underneath the
//! store. [`SharedMedium`] models the storage every terminal of one
//! storefront shares, including the platform rule that a mutation is
//! announced to every *other* attached context but never to the writer -
//! plus fault injection for tests.
//!
//! ### The store
//!
//! [`ResilientStore`] probes its medium once at construction, then absorbs
//! all failures: a failed write flips it permanently into
//! [`StorageMode::AirGapped`] and lands in memory. Because the platform
//! never notifies the writing context of its own writes, the store
//! synthesizes a local [`ChangeEvent`] per mutation so same-terminal
//! listeners stay consistent.
//!
//! ### Notifications
//!
//! [`Notifier`] is a small synchronous publish/subscribe registry. Every
//! subscription returns a [`Subscription`] handle; dropping the handle
//! unregisters the listener, so teardown leaves nothing dangling.
//!
//! ## Quick Start
//!
//! ```rust
//! use till_vault::{ResilientStore, SharedMedium, StorageMode};
//!
//! // One storefront's shared environment, one terminal attached to it.
//! let medium = SharedMedium::new("shop.example");
//! let store = ResilientStore::new(Box::new(medium.attach("till-1")));
//! assert_eq!(store.mode(), StorageMode::Normal);
//!
//! // Writes never fail, even when the quota trips mid-stream.
//! store.set("till_tx_1", "sealed");
//! medium.fail_writes_after(0);
//! store.set("till_tx_2", "sealed");
//!
//! assert_eq!(store.mode(), StorageMode::AirGapped);
//! assert_eq!(store.get("till_tx_2").as_deref(), Some("sealed"));
//! ```

pub mod error;
pub mod event;
pub mod medium;
pub mod notify;
pub mod shared;
pub mod store;

// Re-export main types at crate root
pub use error::MediumError;
pub use event::{AirGapAlert, AlertTrigger, ChangeEvent, Origin};
pub use medium::{MemoryMedium, StorageMedium};
pub use notify::{Notifier, Subscription};
pub use shared::{Attachment, RemoteChange, RemoteWatch, SharedMedium};
pub use store::{ResilientStore, StorageMode, StoreStats};
