//! Configuration for the sync runtime.

use std::env;
use std::time::Duration;

/// Runtime configuration, loadable from environment variables.
///
/// The three delays are policy values tuned for a plausible selling flow,
/// not timing guarantees; tests shorten them freely.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Origin scope this storefront's terminals run under
    pub origin: String,
    /// Name of the cross-terminal channel; doubles as the relay storage key
    pub channel_name: String,
    /// Key prefix for durable transaction records
    pub record_prefix: String,
    /// How long a relay message stays under the relay key before cleanup
    pub relay_cleanup: Duration,
    /// Pause between the durable write and the start announcement
    pub scramble_gate: Duration,
    /// Wait after which a non-degraded transaction is presumed settled
    pub settle_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            origin: "till.local".to_string(),
            channel_name: "till_sync_v1".to_string(),
            record_prefix: "till_tx_".to_string(),
            relay_cleanup: Duration::from_millis(100),
            scramble_gate: Duration::from_millis(600),
            settle_delay: Duration::from_millis(1000),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            origin: env::var("TILL_ORIGIN").unwrap_or(defaults.origin),
            channel_name: env::var("TILL_CHANNEL").unwrap_or(defaults.channel_name),
            record_prefix: env::var("TILL_RECORD_PREFIX").unwrap_or(defaults.record_prefix),
            relay_cleanup: duration_var("TILL_RELAY_CLEANUP_MS", defaults.relay_cleanup)?,
            scramble_gate: duration_var("TILL_SCRAMBLE_GATE_MS", defaults.scramble_gate)?,
            settle_delay: duration_var("TILL_SETTLE_DELAY_MS", defaults.settle_delay)?,
        })
    }

    /// Durable storage key for a transaction record.
    pub fn record_key(&self, id: u64) -> String {
        format!("{}{}", self.record_prefix, id)
    }
}

fn duration_var(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::InvalidDuration(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid {0} value, expected milliseconds")]
    InvalidDuration(&'static str),
}
