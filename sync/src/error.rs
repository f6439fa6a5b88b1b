//! Error types for the sync runtime.
//!
//! Most failures in this crate never reach a caller: transport construction
//! failures select the relay fallback, send failures and unparseable
//! messages are dropped where they happen. What remains is the small set of
//! conditions a caller can actually act on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The native broadcast transport could not be constructed.
    /// Internal trigger for relay fallback; callers normally never see it.
    #[error("native channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// The encryption capability failed. The transaction pipeline is
    /// inoperable for this terminal; everything else keeps running.
    #[error("encryption unavailable: {0}")]
    Encryption(String),

    /// The terminal has been closed; no further operations are accepted.
    #[error("terminal is closed")]
    Closed,
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, Error>;
