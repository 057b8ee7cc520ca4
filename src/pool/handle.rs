use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::engine::{DbUrl, ResultSet, Storage, StorageConfig, StorageStats};
use crate::query::Statement;
use crate::types::{Result, UmbraError};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// How a handle reached [`HandleState::Closed`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseKind {
    /// Closed by the pool once no session referenced it.
    Graceful,
    /// Closed through [`StorageHandle::close_forced`] regardless of references.
    Forced,
}

/// Lifecycle of a [`StorageHandle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleState {
    /// The engine is opening the storage.
    Opening,
    /// Key verified, storage usable.
    Open,
    /// The engine rejected the method or key. Terminal.
    Invalid,
    /// Closed. Terminal.
    Closed(CloseKind),
}

struct HandleInner {
    state: HandleState,
    storage: Option<Box<dyn Storage>>,
}

/// Shared handle to one open storage.
///
/// Owned by the pool; every live session holds an `Arc` plus one reference
/// count. Reference counts gate graceful close only: a forced close takes
/// effect immediately and every holder sees [`UmbraError::StorageClosed`].
pub struct StorageHandle {
    id: u64,
    url: DbUrl,
    config: StorageConfig,
    refs: AtomicUsize,
    inner: RwLock<HandleInner>,
}

impl StorageHandle {
    pub(crate) fn opening(url: DbUrl, config: StorageConfig) -> Self {
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            url,
            config,
            refs: AtomicUsize::new(0),
            inner: RwLock::new(HandleInner {
                state: HandleState::Opening,
                storage: None,
            }),
        }
    }

    pub(crate) fn install(&self, storage: Box<dyn Storage>) {
        let mut inner = self.inner.write();
        inner.storage = Some(storage);
        inner.state = HandleState::Open;
    }

    pub(crate) fn invalidate(&self) {
        let mut inner = self.inner.write();
        inner.storage = None;
        inner.state = HandleState::Invalid;
    }

    pub(crate) fn retain(&self) -> usize {
        self.refs.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drops one reference; never goes below zero.
    pub(crate) fn release(&self) -> usize {
        let prev = self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        if prev == 0 {
            warn!(handle = self.id, url = %self.url, "pool.handle.release_underflow");
        }
        prev.saturating_sub(1)
    }

    /// Process-unique id; a reopened storage gets a new one.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// URL the handle was opened for.
    pub fn url(&self) -> &DbUrl {
        &self.url
    }

    /// Configuration the storage was opened with.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Current reference count.
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// Current state.
    pub fn state(&self) -> HandleState {
        self.inner.read().state
    }

    /// True while the storage is usable.
    pub fn is_open(&self) -> bool {
        self.state() == HandleState::Open
    }

    /// True once the handle reached a terminal closed state.
    pub fn is_closed(&self) -> bool {
        matches!(self.state(), HandleState::Closed(_))
    }

    /// Graceful close, only when no reference is outstanding.
    /// Returns true if this call closed the storage.
    pub(crate) fn close(&self) -> Result<bool> {
        if self.ref_count() > 0 {
            return Ok(false);
        }
        self.shutdown()
    }

    /// Graceful close regardless of references. Returns true if this call
    /// closed the storage.
    pub(crate) fn shutdown(&self) -> Result<bool> {
        let mut inner = self.inner.write();
        if inner.state != HandleState::Open {
            return Ok(false);
        }
        inner.state = HandleState::Closed(CloseKind::Graceful);
        let result = match inner.storage.take() {
            Some(storage) => storage.close(),
            None => Ok(()),
        };
        debug!(handle = self.id, url = %self.url, "pool.handle.closed");
        result.map(|()| true)
    }

    /// Forces the storage closed now, whatever references exist.
    ///
    /// `flush` writes buffered frames first; `panic` skips the clean-shutdown
    /// marker so the next open runs recovery. Idempotent.
    pub fn close_forced(&self, flush: bool, panic: bool) -> Result<()> {
        let mut inner = self.inner.write();
        if matches!(inner.state, HandleState::Closed(_) | HandleState::Invalid) {
            return Ok(());
        }
        inner.state = HandleState::Closed(CloseKind::Forced);
        warn!(
            handle = self.id,
            url = %self.url,
            refs = self.ref_count(),
            flush,
            panic,
            "pool.handle.close_forced"
        );
        match inner.storage.take() {
            Some(storage) => storage.close_forced(flush, panic),
            None => Ok(()),
        }
    }

    fn state_error(state: HandleState) -> UmbraError {
        match state {
            HandleState::Closed(_) => UmbraError::StorageClosed,
            HandleState::Invalid => {
                UmbraError::Security("storage handle was rejected at open".into())
            }
            HandleState::Opening | HandleState::Open => {
                UmbraError::Invalid("storage handle is not open")
            }
        }
    }

    /// Fails fast unless the handle is open.
    pub fn ensure_usable(&self) -> Result<()> {
        let inner = self.inner.read();
        match (&inner.storage, inner.state) {
            (Some(_), HandleState::Open) => Ok(()),
            (_, state) => Err(Self::state_error(state)),
        }
    }

    fn with_storage<T>(&self, f: impl FnOnce(&dyn Storage) -> Result<T>) -> Result<T> {
        let inner = self.inner.read();
        match (&inner.storage, inner.state) {
            (Some(storage), HandleState::Open) => f(storage.as_ref()),
            (_, state) => Err(Self::state_error(state)),
        }
    }

    /// Runs a read-only statement.
    pub fn query(&self, stmt: &Statement) -> Result<ResultSet> {
        self.with_storage(|s| s.query(stmt))
    }

    /// Applies statements as one atomic batch.
    pub fn execute_batch(&self, stmts: &[Statement]) -> Result<u64> {
        self.with_storage(|s| s.execute_batch(stmts))
    }

    /// Writes and syncs buffered frames.
    pub fn flush(&self) -> Result<()> {
        self.with_storage(|s| s.flush())
    }

    /// Storage counters.
    pub fn stats(&self) -> Result<StorageStats> {
        self.with_storage(|s| Ok(s.stats()))
    }
}

impl fmt::Debug for StorageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageHandle")
            .field("id", &self.id)
            .field("url", &self.url.as_str())
            .field("method", &self.config.encryption.method())
            .field("refs", &self.ref_count())
            .field("state", &self.state())
            .finish()
    }
}
