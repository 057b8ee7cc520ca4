#![forbid(unsafe_code)]

//! Storage engine boundary and the file-backed `plocal` engine.
//!
//! The pool only ever talks to [`StorageEngine`] and [`Storage`]; the
//! engine is the sole place that touches storage files.

mod frame;
mod meta;
mod plocal;
mod record;

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::{ConnectionProperties, SyncMode};
use crate::crypto::{resolve_encryption, EncryptionConfig};
use crate::query::Statement;
use crate::types::{Result, UmbraError};

pub use frame::{encode_frame, scan_frames, LogScan, FRAME_HEADER_LEN};
pub use meta::{load_meta, store_meta, Meta, META_LEN};
pub use plocal::{PlocalEngine, DATA_FILE};
pub use record::{GraphState, LogOp, Record, RecordId, ResultSet};

const PLOCAL_SCHEME: &str = "plocal:";

/// Parsed connection URL. Only `plocal:<path>` is supported.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DbUrl {
    raw: String,
    path: PathBuf,
}

impl DbUrl {
    /// Parses `plocal:<path>`. The scheme is matched case-insensitively.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let scheme_end = raw.find(':').ok_or_else(|| {
            UmbraError::Config(format!("connection url '{raw}' has no scheme"))
        })?;
        let (scheme, rest) = raw.split_at(scheme_end + 1);
        if !scheme.eq_ignore_ascii_case(PLOCAL_SCHEME) {
            return Err(UmbraError::Config(format!(
                "unsupported url scheme '{}'",
                &scheme[..scheme.len() - 1]
            )));
        }
        if rest.is_empty() {
            return Err(UmbraError::Config(format!(
                "connection url '{raw}' has no path"
            )));
        }
        Ok(Self {
            raw: format!("{PLOCAL_SCHEME}{rest}"),
            path: PathBuf::from(rest),
        })
    }

    /// Builds a `plocal:` URL for a directory.
    pub fn plocal(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            raw: format!("{PLOCAL_SCHEME}{}", path.display()),
            path,
        }
    }

    /// Storage directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Normalized URL text.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for DbUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for DbUrl {
    type Err = UmbraError;

    fn from_str(s: &str) -> Result<Self> {
        DbUrl::parse(s)
    }
}

/// Everything the engine needs to create or open a storage.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    /// Cipher and key.
    pub encryption: EncryptionConfig,
    /// Durability of committed frames.
    pub sync_mode: SyncMode,
}

impl StorageConfig {
    /// Resolves from a property snapshot. Pure; never touches storage.
    pub fn resolve(props: &ConnectionProperties) -> Result<Self> {
        Ok(Self {
            encryption: resolve_encryption(props)?,
            sync_mode: SyncMode::from_properties(props)?,
        })
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            encryption: EncryptionConfig::none(),
            sync_mode: SyncMode::Full,
        }
    }
}

/// Counters reported by an open storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of classes.
    pub classes: usize,
    /// Number of live records.
    pub records: u64,
    /// Frames appended since open.
    pub frames_written: u64,
    /// Frames buffered and not yet written.
    pub frames_pending: usize,
    /// Frames replayed while opening.
    pub frames_replayed: usize,
    /// True if opening found an unclean shutdown.
    pub recovered: bool,
}

/// Creates and opens storages. Implementations must be thread safe.
pub trait StorageEngine: Send + Sync {
    /// True if a storage exists at `url`.
    fn exists(&self, url: &DbUrl) -> Result<bool>;
    /// Creates an empty storage recording `config`'s cipher and a key check.
    fn create(&self, url: &DbUrl, config: &StorageConfig) -> Result<()>;
    /// Opens an existing storage, verifying the method and key before any
    /// record is read. A mismatch fails with [`UmbraError::Security`].
    fn open(&self, url: &DbUrl, config: &StorageConfig) -> Result<Box<dyn Storage>>;
}

/// An open storage.
pub trait Storage: Send + Sync {
    /// Runs a read-only statement.
    fn query(&self, stmt: &Statement) -> Result<ResultSet>;
    /// Applies statements atomically: all are durable or none is visible.
    fn execute_batch(&self, stmts: &[Statement]) -> Result<u64>;
    /// Applies one statement.
    fn command(&self, stmt: &Statement) -> Result<u64> {
        self.execute_batch(std::slice::from_ref(stmt))
    }
    /// Writes and syncs buffered frames.
    fn flush(&self) -> Result<()>;
    /// Graceful close: flush, mark clean. Idempotent.
    fn close(&self) -> Result<()>;
    /// Immediate close. Buffered frames are written only when `flush` is set;
    /// `panic` leaves the storage marked unclean so the next open recovers.
    fn close_forced(&self, flush: bool, panic: bool) -> Result<()>;
    /// Current counters.
    fn stats(&self) -> StorageStats;
}
