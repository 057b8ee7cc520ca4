//! Umbra: pooled graph sessions over at-rest encrypted `plocal` storage.
//!
//! A [`GraphFactory`] resolves the `storage.encryptionMethod` and
//! `storage.encryptionKey` properties, asks the [`ConnectionPool`] for an
//! open storage and hands out [`Session`]s bound to it. The storage engine
//! verifies the key against a sealed check block before any record is read,
//! so a wrong key or method fails with [`UmbraError::Security`] and leaves
//! the files untouched.
//!
//! ```no_run
//! use umbra::{GraphFactory, STORAGE_ENCRYPTION_KEY, STORAGE_ENCRYPTION_METHOD};
//!
//! # fn main() -> umbra::Result<()> {
//! let factory = GraphFactory::new("plocal:/var/lib/umbra/people")?;
//! factory.set_property(STORAGE_ENCRYPTION_METHOD, "des");
//! factory.set_property(STORAGE_ENCRYPTION_KEY, "T1JJRU5UREJfSVNfQ09PTA==");
//!
//! let mut db = factory.get_database()?;
//! db.command("create class Person")?;
//! db.command("insert into Person set name = 'Jay'")?;
//! assert_eq!(db.query("select from Person")?.len(), 1);
//! db.close();
//! factory.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// Connection properties, bulk configuration and sync modes.
pub mod config;
/// Cipher selection, key handling and the key-check block.
pub mod crypto;
/// Graph factories and sessions.
pub mod db;
/// Storage engine boundary and the `plocal` engine.
pub mod engine;
/// Storage handle pool.
pub mod pool;
/// Low-level file I/O.
pub mod primitives;
/// Statement parser and values.
pub mod query;
/// Error type and checksum helpers.
pub mod types;

pub use config::{
    ConnectionProperties, GraphConfig, SyncMode, STORAGE_ENCRYPTION_KEY,
    STORAGE_ENCRYPTION_METHOD, STORAGE_SYNC_MODE,
};
pub use crypto::{resolve_encryption, EncryptionConfig, EncryptionKey, EncryptionMethod};
pub use db::{GraphFactory, Session, SessionKind, SessionState};
pub use engine::{DbUrl, Record, RecordId, ResultSet, StorageConfig};
pub use pool::{CloseKind, ConnectionPool, HandleState, StorageHandle};
pub use query::{Statement, Value};
pub use types::{Result, UmbraError};
