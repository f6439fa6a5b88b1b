//! Change and alert events published by the store.

use serde::{Deserialize, Serialize};

/// Where a change originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Written through this store instance
    Local,
    /// Observed from another terminal via the shared medium
    Remote,
}

/// A single key change, published once per successful write or removal.
///
/// Local events are synthesized by the store itself because the platform
/// medium only notifies *other* contexts of a write, never the writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// The key that changed
    pub key: String,
    /// The new value, or `None` for a removal
    pub new_value: Option<String>,
    /// Whether the store was air-gapped when the change landed
    pub air_gapped: bool,
    /// Local write or remote observation
    pub origin: Origin,
}

impl ChangeEvent {
    pub fn local(key: impl Into<String>, new_value: Option<String>, air_gapped: bool) -> Self {
        Self {
            key: key.into(),
            new_value,
            air_gapped,
            origin: Origin::Local,
        }
    }

    pub fn remote(key: impl Into<String>, new_value: Option<String>, air_gapped: bool) -> Self {
        Self {
            key: key.into(),
            new_value,
            air_gapped,
            origin: Origin::Remote,
        }
    }
}

/// What pushed the store into air-gapped mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertTrigger {
    /// The construction-time probe write failed
    Probe,
    /// A later write failed after a healthy probe
    Write,
}

/// Emitted exactly once per store lifetime, on the transition into
/// air-gapped mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AirGapAlert {
    pub trigger: AlertTrigger,
    /// Milliseconds since the Unix epoch at transition time
    pub at_ms: u64,
}
