#![forbid(unsafe_code)]

//! Shared error type, result alias and checksum helpers.

mod checksum;

pub use checksum::{salted_crc32, Crc32Fast};

/// Errors surfaced by factories, sessions, the pool and the storage engine.
#[derive(thiserror::Error, Debug)]
pub enum UmbraError {
    /// Underlying file I/O failed.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Persisted bytes failed an integrity check.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// An argument or call sequence was rejected.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Connection configuration is unusable (bad URL, unknown method, bad file).
    #[error("configuration: {0}")]
    Config(String),
    /// The encryption key is malformed or has a length the method cannot use.
    #[error("configuration: invalid encryption key: {0}")]
    KeyFormat(String),
    /// Storage refused the supplied encryption method or key.
    #[error("security: {0}")]
    Security(String),
    /// Another open instance holds the storage file.
    #[error("storage is locked: {0}")]
    Locked(String),
    /// The storage handle behind a session was closed.
    #[error("storage is closed")]
    StorageClosed,
    /// The session was already closed by its owner.
    #[error("session is closed")]
    SessionClosed,
    /// The factory was closed and can no longer open sessions.
    #[error("graph factory is closed")]
    FactoryClosed,
    /// A statement could not be parsed.
    #[error("syntax: {0}")]
    Syntax(String),
    /// A statement conflicts with the current schema.
    #[error("schema: {0}")]
    Schema(String),
    /// A named class or record does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// Encoding or decoding a log payload failed.
    #[error("serialization: {0}")]
    Serialization(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, UmbraError>;

impl UmbraError {
    /// Returns true for errors detected while resolving configuration, before any I/O.
    pub fn is_config_error(&self) -> bool {
        matches!(self, UmbraError::Config(_) | UmbraError::KeyFormat(_))
    }

    /// Returns true when the failure was caused by the supplied key or method,
    /// whether it was rejected up front or by the storage itself.
    ///
    /// A key that is not valid padded base64 (for example `"invalid"`) fails as
    /// [`UmbraError::KeyFormat`] during resolution, not as
    /// [`UmbraError::Security`]. Callers that treat every bad key as a security
    /// failure should test this predicate instead of matching `Security`.
    pub fn is_key_rejection(&self) -> bool {
        matches!(self, UmbraError::KeyFormat(_) | UmbraError::Security(_))
    }
}

impl From<serde_json::Error> for UmbraError {
    fn from(err: serde_json::Error) -> Self {
        UmbraError::Serialization(err.to_string())
    }
}

/// Reads a big-endian `u16` at `off`; the caller guarantees the bounds.
pub(crate) fn be_u16(buf: &[u8], off: usize) -> u16 {
    let mut raw = [0u8; 2];
    raw.copy_from_slice(&buf[off..off + 2]);
    u16::from_be_bytes(raw)
}

/// Reads a big-endian `u32` at `off`; the caller guarantees the bounds.
pub(crate) fn be_u32(buf: &[u8], off: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[off..off + 4]);
    u32::from_be_bytes(raw)
}

/// Reads a big-endian `u64` at `off`; the caller guarantees the bounds.
pub(crate) fn be_u64(buf: &[u8], off: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[off..off + 8]);
    u64::from_be_bytes(raw)
}
