//! The persistent key-value medium underneath the resilient store.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::Result;

/// A persistent string-to-string medium.
///
/// This is the only layer of the crate that is allowed to fail: quota
/// exhaustion, restricted contexts, and backend faults all surface here as
/// [`MediumError`](crate::MediumError)s, and [`ResilientStore`](crate::ResilientStore)
/// absorbs every one of them. Values are opaque serialized strings; keys are
/// namespaced by caller convention only.
pub trait StorageMedium: Send + Sync {
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn remove(&self, key: &str) -> Result<()>;
    /// All keys currently present, in no particular order.
    fn keys(&self) -> Result<Vec<String>>;
    /// Remove every key in the medium, not just keys owned by one caller.
    fn clear(&self) -> Result<()>;
}

/// A plain in-process medium that never fails.
///
/// Useful for tests and for embedding the store where no shared environment
/// exists.
#[derive(Debug, Default)]
pub struct MemoryMedium {
    data: RwLock<HashMap<String, String>>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageMedium for MemoryMedium {
    fn set(&self, key: &str, value: &str) -> Result<()> {
        if let Ok(mut data) = self.data.write() {
            data.insert(key.to_owned(), value.to_owned());
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .data
            .read()
            .ok()
            .and_then(|data| data.get(key).cloned()))
    }

    fn remove(&self, key: &str) -> Result<()> {
        if let Ok(mut data) = self.data.write() {
            data.remove(key);
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .data
            .read()
            .map(|data| data.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn clear(&self) -> Result<()> {
        if let Ok(mut data) = self.data.write() {
            data.clear();
        }
        Ok(())
    }
}
