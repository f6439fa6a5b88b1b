//! Error types for the storage medium boundary.

use thiserror::Error;

/// All possible failures of a persistent storage medium.
///
/// These never escape [`ResilientStore`](crate::ResilientStore); the store
/// converts every one of them into a mode transition or a memory fallback.
/// They are public so that media implementations and tests can produce them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediumError {
    #[error("storage quota exceeded")]
    QuotaExceeded,

    #[error("storage medium is disabled in this context")]
    Disabled,

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Result type for medium operations.
pub type Result<T> = std::result::Result<T, MediumError>;
