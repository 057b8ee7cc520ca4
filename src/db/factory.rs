use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::session::{Session, SessionKind};
use crate::config::{ConnectionProperties, GraphConfig};
use crate::engine::{DbUrl, StorageConfig};
use crate::pool::{ConnectionPool, StorageHandle};
use crate::types::{Result, UmbraError};

/// Entry point: a connection URL, a mutable property bag and a pool.
///
/// Every `get_*` call resolves the encryption settings from the properties
/// as they are at that moment. Sessions already handed out keep the storage
/// they were bound to.
pub struct GraphFactory {
    url: DbUrl,
    properties: RwLock<ConnectionProperties>,
    pool: Arc<ConnectionPool>,
    /// One reference on the last handle this factory opened, so idle storage
    /// stays open between sessions.
    hold: Mutex<Option<Arc<StorageHandle>>>,
    closed: AtomicBool,
}

impl GraphFactory {
    /// Factory for `url` on the process-wide pool.
    pub fn new(url: &str) -> Result<Self> {
        Self::with_pool(url, ConnectionPool::global())
    }

    /// Factory for `url` on an explicit pool.
    pub fn with_pool(url: &str, pool: Arc<ConnectionPool>) -> Result<Self> {
        Ok(Self {
            url: DbUrl::parse(url)?,
            properties: RwLock::new(ConnectionProperties::new()),
            pool,
            hold: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Factory for `url` on the process-wide pool with `config` applied.
    pub fn with_config(url: &str, config: &GraphConfig) -> Result<Self> {
        let factory = Self::new(url)?;
        factory.apply_config(config);
        Ok(factory)
    }

    /// The connection URL.
    pub fn url(&self) -> &DbUrl {
        &self.url
    }

    /// The pool sessions are drawn from.
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Sets a property, returning the previous value. Open storage is untouched.
    pub fn set_property(&self, key: &str, value: &str) -> Option<String> {
        self.properties.write().set(key, value)
    }

    /// Removes a property, returning its value.
    pub fn remove_property(&self, key: &str) -> Option<String> {
        self.properties.write().remove(key)
    }

    /// Current value of a property.
    pub fn property(&self, key: &str) -> Option<String> {
        self.properties.read().get(key).map(str::to_owned)
    }

    /// Snapshot of all properties.
    pub fn properties(&self) -> ConnectionProperties {
        self.properties.read().clone()
    }

    /// Merges a bulk configuration into the properties.
    pub fn apply_config(&self, config: &GraphConfig) {
        config.apply_to(&mut self.properties.write());
    }

    /// Transactional session.
    pub fn get_database(&self) -> Result<Session> {
        self.open_session(SessionKind::Transactional)
    }

    /// Non-transactional session.
    pub fn get_no_tx(&self) -> Result<Session> {
        self.open_session(SessionKind::NonTransactional)
    }

    /// Non-transactional raw document session.
    pub fn get_raw_graph(&self) -> Result<Session> {
        self.open_session(SessionKind::Raw)
    }

    fn open_session(&self, kind: SessionKind) -> Result<Session> {
        if self.is_closed() {
            return Err(UmbraError::FactoryClosed);
        }
        let props = self.properties();
        let config = StorageConfig::resolve(&props)?;
        let handle = self.pool.acquire(&self.url, &config)?;
        self.pin(&handle);
        Ok(Session::new(handle, Arc::clone(&self.pool), kind, props))
    }

    /// Moves the factory's own reference to `handle`.
    fn pin(&self, handle: &Arc<StorageHandle>) {
        let mut hold = self.hold.lock();
        if self.is_closed() {
            return;
        }
        if hold.as_ref().is_some_and(|held| Arc::ptr_eq(held, handle)) {
            return;
        }
        handle.retain();
        if let Some(previous) = hold.replace(Arc::clone(handle)) {
            debug!(previous = previous.id(), current = handle.id(), "factory.pin.replace");
            self.pool.release(&previous);
        }
    }

    /// True after [`GraphFactory::close`].
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Releases the factory's reference and closes the storage if no session
    /// still uses it. Idempotent; later `get_*` calls fail.
    pub fn close(&self) -> Result<()> {
        let held = {
            let mut hold = self.hold.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            hold.take()
        };
        if let Some(handle) = held {
            self.pool.release(&handle);
        }
        let closed = self.pool.close_idle(&self.url)?;
        info!(url = %self.url, storage_closed = closed, "factory.close");
        Ok(())
    }
}

impl Drop for GraphFactory {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(url = %self.url, error = %err, "factory.drop.close_failed");
        }
    }
}

impl fmt::Debug for GraphFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphFactory")
            .field("url", &self.url.as_str())
            .field("properties", &*self.properties.read())
            .field("closed", &self.is_closed())
            .finish()
    }
}
