use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ConnectionProperties;
use crate::engine::ResultSet;
use crate::pool::{ConnectionPool, StorageHandle};
use crate::query::Statement;
use crate::types::{Result, UmbraError};

/// Flavour of a session, fixed at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionKind {
    /// Graph session supporting `begin`/`commit`/`rollback`.
    Transactional,
    /// Graph session where every command commits on its own.
    NonTransactional,
    /// Raw document session; non-transactional.
    Raw,
}

impl SessionKind {
    /// True if explicit transactions are allowed.
    pub fn is_transactional(self) -> bool {
        self == SessionKind::Transactional
    }
}

/// Whether a session can still be used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Usable.
    Open,
    /// Closed by its owner. Terminal.
    Closed,
}

/// One logical connection bound to the storage handle it was opened on.
///
/// The binding never changes: if the handle is closed underneath, every
/// operation fails with [`UmbraError::StorageClosed`] and a new session must
/// be requested from the factory.
pub struct Session {
    handle: Arc<StorageHandle>,
    pool: Arc<ConnectionPool>,
    kind: SessionKind,
    state: SessionState,
    properties: ConnectionProperties,
    tx: Option<Vec<Statement>>,
}

impl Session {
    /// Wraps a handle that already carries a reference for this session.
    pub(crate) fn new(
        handle: Arc<StorageHandle>,
        pool: Arc<ConnectionPool>,
        kind: SessionKind,
        properties: ConnectionProperties,
    ) -> Self {
        debug!(handle = handle.id(), kind = ?kind, "session.open");
        Self {
            handle,
            pool,
            kind,
            state: SessionState::Open,
            properties,
            tx: None,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            SessionState::Open => Ok(()),
            SessionState::Closed => Err(UmbraError::SessionClosed),
        }
    }

    /// Runs a `SELECT`. Inside a transaction, buffered commands are not visible.
    pub fn query(&self, sql: &str) -> Result<ResultSet> {
        self.ensure_open()?;
        let stmt = Statement::parse(sql)?.expect_query()?;
        self.handle.query(&stmt)
    }

    /// Runs a mutating statement and returns the number of records affected.
    ///
    /// Inside a transaction the statement is buffered and `0` is returned;
    /// the count is reported by [`Session::commit`].
    pub fn command(&mut self, sql: &str) -> Result<u64> {
        self.ensure_open()?;
        let stmt = Statement::parse(sql)?.expect_command()?;
        self.handle.ensure_usable()?;
        if let Some(buffer) = self.tx.as_mut() {
            buffer.push(stmt);
            return Ok(0);
        }
        self.handle.execute_batch(std::slice::from_ref(&stmt))
    }

    /// Starts a transaction.
    pub fn begin(&mut self) -> Result<()> {
        self.ensure_open()?;
        if !self.kind.is_transactional() {
            return Err(UmbraError::Invalid(
                "non-transactional session cannot begin a transaction",
            ));
        }
        if self.tx.is_some() {
            return Err(UmbraError::Invalid("transaction already active"));
        }
        self.handle.ensure_usable()?;
        self.tx = Some(Vec::new());
        Ok(())
    }

    /// Writes every buffered statement as one atomic batch.
    pub fn commit(&mut self) -> Result<u64> {
        self.ensure_open()?;
        let stmts = self
            .tx
            .take()
            .ok_or(UmbraError::Invalid("no active transaction"))?;
        if stmts.is_empty() {
            return Ok(0);
        }
        let affected = self.handle.execute_batch(&stmts)?;
        debug!(handle = self.handle.id(), statements = stmts.len(), affected, "session.commit");
        Ok(affected)
    }

    /// Discards buffered statements.
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        let stmts = self
            .tx
            .take()
            .ok_or(UmbraError::Invalid("no active transaction"))?;
        debug!(handle = self.handle.id(), discarded = stmts.len(), "session.rollback");
        Ok(())
    }

    /// True between `begin` and `commit`/`rollback`.
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// The storage handle this session is bound to.
    pub fn storage(&self) -> &Arc<StorageHandle> {
        &self.handle
    }

    /// Session flavour.
    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True once closed.
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Properties the session was opened with.
    pub fn properties(&self) -> &ConnectionProperties {
        &self.properties
    }

    /// Reads a property from the session's snapshot.
    #[deprecated(note = "read properties from the GraphFactory instead")]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key)
    }

    /// Writes a property into the session's snapshot. The open storage is
    /// not affected.
    #[deprecated(note = "set properties on the GraphFactory before opening a session")]
    pub fn set_property(&mut self, key: &str, value: &str) -> Option<String> {
        self.properties.set(key, value)
    }

    /// Rolls back an active transaction and releases the storage reference.
    /// Idempotent.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if let Some(stmts) = self.tx.take() {
            debug!(handle = self.handle.id(), discarded = stmts.len(), "session.close.rollback");
        }
        self.state = SessionState::Closed;
        let refs = self.pool.release(&self.handle);
        debug!(handle = self.handle.id(), refs, "session.close");
        // Last user of a storage whose factory is gone.
        if refs == 0 && self.handle.is_open() {
            if let Err(err) = self.pool.close_idle(self.handle.url()) {
                warn!(url = %self.handle.url(), error = %err, "session.close.storage_close_failed");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.handle.id())
            .field("url", &self.handle.url().as_str())
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("in_transaction", &self.in_transaction())
            .field("properties", &self.properties)
            .finish()
    }
}
