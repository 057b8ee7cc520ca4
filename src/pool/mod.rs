#![forbid(unsafe_code)]

//! Reference-counted cache of open storages keyed by URL.
//!
//! The map lock is held only to find or insert a per-URL slot. Each slot has
//! its own lock, held across the open, so a failing open is never visible as
//! a cached handle and unrelated URLs never wait on each other.

mod handle;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::engine::{DbUrl, PlocalEngine, StorageConfig, StorageEngine};
use crate::types::Result;

pub use handle::{CloseKind, HandleState, StorageHandle};

type Slot = Arc<Mutex<Option<Arc<StorageHandle>>>>;

static GLOBAL_POOL: OnceLock<Arc<ConnectionPool>> = OnceLock::new();

/// Pool of open storages shared by factories.
pub struct ConnectionPool {
    engine: Arc<dyn StorageEngine>,
    slots: Mutex<HashMap<DbUrl, Slot>>,
}

impl ConnectionPool {
    /// Pool over an arbitrary engine.
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self {
            engine,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Pool over the file-backed engine.
    pub fn plocal() -> Self {
        Self::new(Arc::new(PlocalEngine::new()))
    }

    /// Process-wide pool used by factories built without an explicit one.
    pub fn global() -> Arc<ConnectionPool> {
        GLOBAL_POOL
            .get_or_init(|| Arc::new(ConnectionPool::plocal()))
            .clone()
    }

    fn slot(&self, url: &DbUrl) -> Slot {
        self.slots.lock().entry(url.clone()).or_default().clone()
    }

    fn existing_slot(&self, url: &DbUrl) -> Option<Slot> {
        self.slots.lock().get(url).cloned()
    }

    /// Removes the entry for `url` once its slot is empty and no other caller
    /// holds a clone. Clones are only handed out under the map lock, so the
    /// count cannot grow while it is held.
    fn prune(&self, url: &DbUrl, slot: &Slot) {
        let mut slots = self.slots.lock();
        let unused = slots
            .get(url)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
            && Arc::strong_count(slot) == 2
            && slot.lock().is_none();
        if unused {
            slots.remove(url);
        }
    }

    /// Returns an open handle for `url` with one more reference.
    ///
    /// An open cached handle is reused as is: the key was verified when it
    /// opened, so `config` is not checked again. Otherwise the storage is
    /// created if missing and opened. A rejected open caches nothing, so a
    /// retry with the same bad key runs the real open again.
    pub fn acquire(&self, url: &DbUrl, config: &StorageConfig) -> Result<Arc<StorageHandle>> {
        let slot = self.slot(url);
        let result = self.acquire_in(url, config, &mut slot.lock());
        if result.is_err() {
            self.prune(url, &slot);
        }
        result
    }

    fn acquire_in(
        &self,
        url: &DbUrl,
        config: &StorageConfig,
        cached: &mut Option<Arc<StorageHandle>>,
    ) -> Result<Arc<StorageHandle>> {
        if let Some(handle) = cached.as_ref() {
            if handle.is_open() {
                let refs = handle.retain();
                debug!(handle = handle.id(), url = %url, refs, "pool.acquire.reuse");
                return Ok(Arc::clone(handle));
            }
            debug!(handle = handle.id(), url = %url, state = ?handle.state(), "pool.acquire.discard");
            *cached = None;
        }

        if !self.engine.exists(url)? {
            self.engine.create(url, config)?;
        }
        let handle = Arc::new(StorageHandle::opening(url.clone(), config.clone()));
        match self.engine.open(url, config) {
            Ok(storage) => {
                handle.install(storage);
                handle.retain();
                debug!(handle = handle.id(), url = %url, "pool.acquire.open");
                *cached = Some(Arc::clone(&handle));
                Ok(handle)
            }
            Err(err) => {
                handle.invalidate();
                warn!(url = %url, error = %err, "pool.acquire.failed");
                Err(err)
            }
        }
    }

    /// Drops one reference. Never closes the storage.
    pub fn release(&self, handle: &StorageHandle) -> usize {
        let refs = handle.release();
        debug!(handle = handle.id(), url = %handle.url(), refs, "pool.release");
        refs
    }

    /// The cached handle for `url`, whatever its state.
    pub fn lookup(&self, url: &DbUrl) -> Option<Arc<StorageHandle>> {
        let slot = self.existing_slot(url)?;
        let cached = slot.lock();
        cached.clone()
    }

    /// Closes the storage for `url` if nothing references it.
    /// Returns true if a handle was closed by this call.
    pub fn close_idle(&self, url: &DbUrl) -> Result<bool> {
        let Some(slot) = self.existing_slot(url) else {
            return Ok(false);
        };
        let result = Self::close_if_idle(url, &mut slot.lock());
        self.prune(url, &slot);
        result
    }

    fn close_if_idle(url: &DbUrl, cached: &mut Option<Arc<StorageHandle>>) -> Result<bool> {
        let Some(handle) = cached.as_ref() else {
            return Ok(false);
        };
        if handle.ref_count() > 0 {
            debug!(handle = handle.id(), url = %url, refs = handle.ref_count(), "pool.close_idle.busy");
            return Ok(false);
        }
        let result = handle.close();
        *cached = None;
        result
    }

    /// Closes every pooled storage regardless of references. Continues past
    /// failures and returns the first one.
    pub fn close_all(&self) -> Result<()> {
        let slots: Vec<Slot> = self.slots.lock().values().cloned().collect();
        let mut first_err = None;
        for slot in slots {
            let mut cached = slot.lock();
            if let Some(handle) = cached.take() {
                if let Err(err) = handle.shutdown() {
                    warn!(url = %handle.url(), error = %err, "pool.close_all.failed");
                    first_err.get_or_insert(err);
                }
            }
        }
        self.slots
            .lock()
            .retain(|_, slot| Arc::strong_count(slot) > 1 || slot.lock().is_some());
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Number of cached handles that are open.
    pub fn len(&self) -> usize {
        let slots: Vec<Slot> = self.slots.lock().values().cloned().collect();
        slots
            .iter()
            .filter(|slot| slot.lock().as_ref().is_some_and(|h| h.is_open()))
            .count()
    }

    /// True if no open handle is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
