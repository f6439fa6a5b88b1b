//! Encryption of transaction records at rest.
//!
//! Records are sealed with AES-256-GCM under a per-terminal session key and
//! a fresh random 96-bit IV per call. The key lives only in memory, is never
//! persisted or put on the wire, and is wiped on drop.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::{Error, Result};

/// IV length AES-GCM operates with, in bytes.
pub const IV_LENGTH: usize = 12;

/// Per-terminal symmetric key (256-bit).
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
        Self(bytes)
    }

    fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// An encrypted record as it sits in durable storage.
///
/// The serialized form is the pinned at-rest format:
/// `{"iv":[12 integers],"data":[N integers]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedRecord {
    pub iv: Vec<u8>,
    pub data: Vec<u8>,
}

/// Encrypt a JSON-serializable value under `key` with a fresh random IV.
///
/// # Errors
///
/// Returns [`Error::Encryption`] if serialization or encryption fails.
pub fn seal<T: Serialize>(key: &SessionKey, record: &T) -> Result<SealedRecord> {
    let plaintext =
        serde_json::to_vec(record).map_err(|e| Error::Encryption(e.to_string()))?;

    let mut iv = [0u8; IV_LENGTH];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut iv);

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let data = cipher
        .encrypt(aes_gcm::Nonce::from_slice(&iv), plaintext.as_slice())
        .map_err(|e| Error::Encryption(e.to_string()))?;

    Ok(SealedRecord {
        iv: iv.to_vec(),
        data,
    })
}

/// Decrypt and deserialize a sealed record.
///
/// # Errors
///
/// Returns [`Error::Encryption`] on a malformed IV, an authentication
/// failure, or an unparseable plaintext.
pub fn open<T: DeserializeOwned>(key: &SessionKey, sealed: &SealedRecord) -> Result<T> {
    if sealed.iv.len() != IV_LENGTH {
        return Err(Error::Encryption(format!(
            "malformed iv: expected {IV_LENGTH} bytes, got {}",
            sealed.iv.len()
        )));
    }

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let plaintext = cipher
        .decrypt(aes_gcm::Nonce::from_slice(&sealed.iv), sealed.data.as_slice())
        .map_err(|e| Error::Encryption(e.to_string()))?;

    serde_json::from_slice(&plaintext).map_err(|e| Error::Encryption(e.to_string()))
}
