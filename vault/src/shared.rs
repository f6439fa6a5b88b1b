//! A shared, origin-scoped medium with per-attachment change notifications.
//!
//! Models the persistent storage every terminal of one storefront sees: a
//! single key-value map, plus the platform's notification rule that a
//! mutation is announced to every *other* attached context but never to the
//! writer itself. The store layers its own synthetic local events on top of
//! this (see [`ResilientStore`](crate::ResilientStore)).
//!
//! Hostility is injected here: private-mode lockout, a runtime write budget
//! that exhausts like a quota, and read faults.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use crate::error::{MediumError, Result};
use crate::medium::StorageMedium;

type WatchListener = Arc<dyn Fn(&RemoteChange) + Send + Sync>;

/// A mutation observed from another attachment of the same medium.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChange {
    /// Origin scope of the medium the change happened in
    pub scope: String,
    /// The key that changed
    pub key: String,
    /// The new value, or `None` for a removal
    pub new_value: Option<String>,
}

struct AttachmentSlot {
    id: u64,
    label: String,
    watchers: Vec<(u64, WatchListener)>,
}

struct SharedInner {
    scope: String,
    data: RwLock<HashMap<String, String>>,
    attachments: RwLock<Vec<AttachmentSlot>>,
    next_attachment_id: AtomicU64,
    next_watch_id: AtomicU64,
    private_mode: AtomicBool,
    read_faults: AtomicBool,
    // Remaining successful writes before the quota trips; None = unlimited.
    write_budget: Mutex<Option<u64>>,
}

impl SharedInner {
    fn check_restricted(&self) -> Result<()> {
        if self.private_mode.load(Ordering::Acquire) {
            return Err(MediumError::Disabled);
        }
        Ok(())
    }

    fn check_readable(&self) -> Result<()> {
        self.check_restricted()?;
        if self.read_faults.load(Ordering::Acquire) {
            return Err(MediumError::Backend("simulated read fault".into()));
        }
        Ok(())
    }

    fn consume_write_budget(&self) -> Result<()> {
        let Ok(mut budget) = self.write_budget.lock() else {
            return Ok(());
        };
        match budget.as_mut() {
            Some(0) => Err(MediumError::QuotaExceeded),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Deliver `change` to the watchers of every attachment except `writer`.
    /// Called with no locks held; listeners may re-enter the medium.
    fn fan_out(&self, writer: u64, change: &RemoteChange) {
        let listeners: Vec<WatchListener> = match self.attachments.read() {
            Ok(slots) => slots
                .iter()
                .filter(|slot| slot.id != writer)
                .flat_map(|slot| slot.watchers.iter().map(|(_, l)| Arc::clone(l)))
                .collect(),
            Err(_) => return,
        };
        tracing::trace!(
            scope = %self.scope,
            key = %change.key,
            listeners = listeners.len(),
            "fanning out remote change"
        );
        for listener in listeners {
            listener(change);
        }
    }
}

/// The shared persistent medium of one storefront.
///
/// Cheap to clone; all clones view the same map and fault state.
#[derive(Clone)]
pub struct SharedMedium {
    inner: Arc<SharedInner>,
}

impl SharedMedium {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SharedInner {
                scope: scope.into(),
                data: RwLock::new(HashMap::new()),
                attachments: RwLock::new(Vec::new()),
                next_attachment_id: AtomicU64::new(0),
                next_watch_id: AtomicU64::new(0),
                private_mode: AtomicBool::new(false),
                read_faults: AtomicBool::new(false),
                write_budget: Mutex::new(None),
            }),
        }
    }

    /// Origin scope of this medium.
    pub fn scope(&self) -> &str {
        &self.inner.scope
    }

    /// Attach a new context (one terminal) to the medium.
    pub fn attach(&self, label: impl Into<String>) -> Attachment {
        let label = label.into();
        let id = self.inner.next_attachment_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut slots) = self.inner.attachments.write() {
            slots.push(AttachmentSlot {
                id,
                label: label.clone(),
                watchers: Vec::new(),
            });
        }
        tracing::debug!(scope = %self.inner.scope, attachment = %label, "context attached");
        Attachment {
            inner: Arc::clone(&self.inner),
            id,
            label,
        }
    }

    /// Make every operation fail as if running in a restricted context.
    pub fn simulate_private_mode(&self, enabled: bool) {
        self.inner.private_mode.store(enabled, Ordering::Release);
    }

    /// Let the next `remaining` writes succeed, then fail each one with
    /// a quota error until [`lift_write_limit`](Self::lift_write_limit).
    pub fn fail_writes_after(&self, remaining: u64) {
        if let Ok(mut budget) = self.inner.write_budget.lock() {
            *budget = Some(remaining);
        }
    }

    /// Remove any write limit set by [`fail_writes_after`](Self::fail_writes_after).
    pub fn lift_write_limit(&self) {
        if let Ok(mut budget) = self.inner.write_budget.lock() {
            *budget = None;
        }
    }

    /// Make reads fail with a backend error while leaving writes alone.
    pub fn fail_reads(&self, enabled: bool) {
        self.inner.read_faults.store(enabled, Ordering::Release);
    }

    /// Direct snapshot of a value, bypassing fault injection. Test helper.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.inner
            .data
            .read()
            .ok()
            .and_then(|data| data.get(key).cloned())
    }

    /// Number of keys currently stored, bypassing fault injection.
    pub fn len(&self) -> usize {
        self.inner.data.read().map(|data| data.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SharedMedium {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMedium")
            .field("scope", &self.inner.scope)
            .field("keys", &self.len())
            .finish()
    }
}

/// One context's handle onto a [`SharedMedium`].
///
/// Implements [`StorageMedium`], so a [`ResilientStore`](crate::ResilientStore)
/// can sit directly on top of it. Mutations made through one attachment are
/// announced to the remote-change watchers of every other attachment; the
/// writing attachment is never notified of its own mutation, and a write
/// that leaves the stored value unchanged is not announced at all.
#[derive(Clone)]
pub struct Attachment {
    inner: Arc<SharedInner>,
    id: u64,
    label: String,
}

impl Attachment {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Origin scope of the medium this attachment belongs to.
    pub fn scope(&self) -> &str {
        &self.inner.scope
    }

    /// Watch mutations made by other attachments. Dropping the returned
    /// handle unregisters the listener.
    pub fn on_remote_change(
        &self,
        listener: impl Fn(&RemoteChange) + Send + Sync + 'static,
    ) -> RemoteWatch {
        let watch_id = self.inner.next_watch_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut slots) = self.inner.attachments.write() {
            if let Some(slot) = slots.iter_mut().find(|slot| slot.id == self.id) {
                slot.watchers.push((watch_id, Arc::new(listener)));
            }
        }
        RemoteWatch {
            inner: Arc::downgrade(&self.inner),
            attachment_id: self.id,
            watch_id,
        }
    }
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("scope", &self.inner.scope)
            .field("label", &self.label)
            .finish()
    }
}

impl StorageMedium for Attachment {
    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.inner.check_restricted()?;
        self.inner.consume_write_budget()?;

        let changed = {
            let Ok(mut data) = self.inner.data.write() else {
                return Err(MediumError::Backend("medium poisoned".into()));
            };
            data.insert(key.to_owned(), value.to_owned()).as_deref() != Some(value)
        };

        if changed {
            self.inner.fan_out(
                self.id,
                &RemoteChange {
                    scope: self.inner.scope.clone(),
                    key: key.to_owned(),
                    new_value: Some(value.to_owned()),
                },
            );
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.check_readable()?;
        Ok(self
            .inner
            .data
            .read()
            .ok()
            .and_then(|data| data.get(key).cloned()))
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.inner.check_restricted()?;

        let removed = {
            let Ok(mut data) = self.inner.data.write() else {
                return Err(MediumError::Backend("medium poisoned".into()));
            };
            data.remove(key).is_some()
        };

        if removed {
            self.inner.fan_out(
                self.id,
                &RemoteChange {
                    scope: self.inner.scope.clone(),
                    key: key.to_owned(),
                    new_value: None,
                },
            );
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.inner.check_readable()?;
        Ok(self
            .inner
            .data
            .read()
            .map(|data| data.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn clear(&self) -> Result<()> {
        self.inner.check_restricted()?;
        if let Ok(mut data) = self.inner.data.write() {
            data.clear();
        }
        // No fan-out: reset coordination happens above the medium.
        Ok(())
    }
}

/// Handle for a remote-change listener registered via
/// [`Attachment::on_remote_change`].
#[must_use = "dropping a RemoteWatch immediately unregisters its listener"]
pub struct RemoteWatch {
    inner: Weak<SharedInner>,
    attachment_id: u64,
    watch_id: u64,
}

impl RemoteWatch {
    pub fn cancel(self) {}
}

impl Drop for RemoteWatch {
    fn drop(&mut self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if let Ok(mut slots) = inner.attachments.write() {
            if let Some(slot) = slots.iter_mut().find(|slot| slot.id == self.attachment_id) {
                slot.watchers.retain(|(id, _)| *id != self.watch_id);
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn collecting_watch(attachment: &Attachment) -> (RemoteWatch, Arc<Mutex<Vec<RemoteChange>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let watch = attachment.on_remote_change(move |change| {
            sink.lock().unwrap().push(change.clone());
        });
        (watch, seen)
    }

    #[test]
    fn writer_is_not_notified_of_its_own_mutation() {
        let medium = SharedMedium::new("shop.example");
        let a = medium.attach("terminal-a");
        let b = medium.attach("terminal-b");

        let (_watch_a, seen_a) = collecting_watch(&a);
        let (_watch_b, seen_b) = collecting_watch(&b);

        a.set("k", "v").unwrap();

        assert!(seen_a.lock().unwrap().is_empty());
        let seen = seen_b.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].key, "k");
        assert_eq!(seen[0].new_value.as_deref(), Some("v"));
        assert_eq!(seen[0].scope, "shop.example");
    }

    #[test]
    fn unchanged_write_is_not_announced() {
        let medium = SharedMedium::new("shop.example");
        let a = medium.attach("a");
        let b = medium.attach("b");
        let (_watch, seen) = collecting_watch(&b);

        a.set("k", "v").unwrap();
        a.set("k", "v").unwrap();
        a.set("k", "w").unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].new_value.as_deref(), Some("w"));
    }

    #[test]
    fn removal_announces_null_value_once() {
        let medium = SharedMedium::new("shop.example");
        let a = medium.attach("a");
        let b = medium.attach("b");
        let (_watch, seen) = collecting_watch(&b);

        a.set("k", "v").unwrap();
        a.remove("k").unwrap();
        a.remove("k").unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].new_value, None);
    }

    #[test]
    fn dropped_watch_stops_delivery() {
        let medium = SharedMedium::new("shop.example");
        let a = medium.attach("a");
        let b = medium.attach("b");

        let (watch, seen) = collecting_watch(&b);
        a.set("k1", "v").unwrap();
        drop(watch);
        a.set("k2", "v").unwrap();

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn private_mode_fails_everything() {
        let medium = SharedMedium::new("shop.example");
        let a = medium.attach("a");
        medium.simulate_private_mode(true);

        assert_eq!(a.set("k", "v"), Err(MediumError::Disabled));
        assert_eq!(a.get("k"), Err(MediumError::Disabled));
        assert_eq!(a.remove("k"), Err(MediumError::Disabled));
        assert_eq!(a.keys(), Err(MediumError::Disabled));
        assert_eq!(a.clear(), Err(MediumError::Disabled));
    }

    #[test]
    fn write_budget_exhausts_like_a_quota() {
        let medium = SharedMedium::new("shop.example");
        let a = medium.attach("a");
        medium.fail_writes_after(2);

        assert!(a.set("k1", "v").is_ok());
        assert!(a.set("k2", "v").is_ok());
        assert_eq!(a.set("k3", "v"), Err(MediumError::QuotaExceeded));

        medium.lift_write_limit();
        assert!(a.set("k3", "v").is_ok());
    }

    #[test]
    fn removals_do_not_consume_write_budget() {
        let medium = SharedMedium::new("shop.example");
        let a = medium.attach("a");
        a.set("k", "v").unwrap();

        medium.fail_writes_after(0);
        assert!(a.remove("k").is_ok());
    }

    #[test]
    fn read_faults_leave_writes_alone() {
        let medium = SharedMedium::new("shop.example");
        let a = medium.attach("a");
        medium.fail_reads(true);

        assert!(a.set("k", "v").is_ok());
        assert!(matches!(a.get("k"), Err(MediumError::Backend(_))));
        assert_eq!(medium.peek("k").as_deref(), Some("v"));
    }

    #[test]
    fn listener_may_write_back_into_the_medium() {
        let medium = SharedMedium::new("shop.example");
        let a = medium.attach("a");
        let b = medium.attach("b");

        let echo = b.clone();
        let _watch = b.on_remote_change(move |change| {
            if change.key == "ping" {
                echo.set("pong", "1").unwrap();
            }
        });
        let (_watch_a, seen_a) = collecting_watch(&a);

        a.set("ping", "1").unwrap();

        assert_eq!(medium.peek("pong").as_deref(), Some("1"));
        let seen = seen_a.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].key, "pong");
    }
}
