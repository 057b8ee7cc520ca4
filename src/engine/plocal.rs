use std::fs::{self, OpenOptions};
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::frame::{encode_frame, scan_frames};
use super::meta::{load_meta, store_meta, Meta, META_LEN};
use super::record::{GraphState, LogOp, ResultSet};
use super::{DbUrl, Storage, StorageConfig, StorageEngine, StorageStats};
use crate::config::SyncMode;
use crate::crypto::{EncryptionMethod, KeyCheck, PageCipher};
use crate::primitives::io::{FileIo, StdFileIo};
use crate::query::Statement;
use crate::types::{Result, UmbraError};

/// Name of the single data file inside a storage directory.
pub const DATA_FILE: &str = "graph.udb";

/// File-backed engine: one directory per URL holding [`DATA_FILE`].
#[derive(Clone, Copy, Debug, Default)]
pub struct PlocalEngine;

impl PlocalEngine {
    /// Creates the engine. It holds no state of its own.
    pub fn new() -> Self {
        Self
    }

    fn data_path(url: &DbUrl) -> PathBuf {
        url.path().join(DATA_FILE)
    }
}

fn method_mismatch(url: &DbUrl, stored: EncryptionMethod, requested: EncryptionMethod) -> UmbraError {
    let detail = match (stored, requested) {
        (EncryptionMethod::None, _) => "storage is not encrypted but a key was supplied".to_string(),
        (_, EncryptionMethod::None) => {
            format!("storage is encrypted with {stored} but no key was supplied")
        }
        _ => format!("storage is encrypted with {stored}, not {requested}"),
    };
    UmbraError::Security(format!("cannot open {url}: {detail}"))
}

impl StorageEngine for PlocalEngine {
    fn exists(&self, url: &DbUrl) -> Result<bool> {
        Ok(Self::data_path(url).is_file())
    }

    fn create(&self, url: &DbUrl, config: &StorageConfig) -> Result<()> {
        fs::create_dir_all(url.path())?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(Self::data_path(url))?;
        let io = StdFileIo::new(file);
        let cipher = config.encryption.cipher()?;
        let mut meta = Meta::fresh(config.encryption.method());
        meta.key_check = KeyCheck::seal(cipher.as_ref(), config.encryption.key(), meta.salt)?;
        store_meta(&io, &meta)?;
        info!(url = %url, cipher = %meta.cipher, "plocal.create");
        Ok(())
    }

    fn open(&self, url: &DbUrl, config: &StorageConfig) -> Result<Box<dyn Storage>> {
        let path = Self::data_path(url);
        if !path.is_file() {
            return Err(UmbraError::NotFound(format!("storage {url}")));
        }
        let io = StdFileIo::open(&path)?;
        if !io.try_lock_exclusive()? {
            warn!(url = %url, "plocal.open.locked");
            return Err(UmbraError::Locked(format!(
                "{url} is already open by another pool or process"
            )));
        }
        let mut meta = load_meta(&io)?;

        let requested = config.encryption.method();
        if meta.cipher != requested {
            warn!(url = %url, stored = %meta.cipher, requested = %requested, "plocal.open.method_rejected");
            return Err(method_mismatch(url, meta.cipher, requested));
        }
        let cipher = config.encryption.cipher()?;
        if !KeyCheck::verify(
            cipher.as_ref(),
            config.encryption.key(),
            meta.salt,
            &meta.key_check,
        ) {
            warn!(url = %url, cipher = %meta.cipher, "plocal.open.key_rejected");
            return Err(UmbraError::Security(format!(
                "cannot open {url}: invalid encryption key"
            )));
        }

        let scan = scan_frames(&io, meta.salt, META_LEN as u64)?;
        let recovered = !meta.clean;
        if meta.clean {
            if scan.torn || scan.valid_end != meta.log_end {
                return Err(UmbraError::Corruption(
                    "frame log does not match clean shutdown marker",
                ));
            }
        } else if scan.torn {
            warn!(url = %url, valid_end = scan.valid_end, "plocal.open.truncate_torn_tail");
            io.truncate(scan.valid_end)?;
        }

        let mut state = GraphState::new();
        let frames_replayed = scan.frames.len();
        for sealed in &scan.frames {
            let plain = cipher
                .open(sealed)
                .map_err(|_| UmbraError::Corruption("frame failed to decrypt"))?;
            let ops: Vec<LogOp> = serde_json::from_slice(&plain)?;
            for op in ops {
                state.apply(op)?;
            }
        }

        meta.clean = false;
        meta.log_end = scan.valid_end;
        store_meta(&io, &meta)?;
        info!(
            url = %url,
            cipher = %meta.cipher,
            frames = frames_replayed,
            recovered,
            "plocal.open"
        );
        Ok(Box::new(PlocalStorage {
            url: url.clone(),
            io,
            cipher,
            sync_mode: config.sync_mode,
            inner: Mutex::new(Inner {
                written_end: scan.valid_end,
                tail: scan.valid_end,
                meta,
                state,
                pending: Vec::new(),
                closed: false,
                frames_written: 0,
                frames_replayed,
                recovered,
            }),
        }))
    }
}

struct Inner {
    meta: Meta,
    state: GraphState,
    /// End of the frames already written to the file.
    written_end: u64,
    /// Offset the next frame will occupy, counting buffered frames.
    tail: u64,
    pending: Vec<Vec<u8>>,
    closed: bool,
    frames_written: u64,
    frames_replayed: usize,
    recovered: bool,
}

struct PlocalStorage {
    url: DbUrl,
    io: StdFileIo,
    cipher: Box<dyn PageCipher>,
    sync_mode: SyncMode,
    inner: Mutex<Inner>,
}

impl PlocalStorage {
    fn write_pending(&self, inner: &mut Inner) -> Result<()> {
        if inner.pending.is_empty() {
            return Ok(());
        }
        let frames = std::mem::take(&mut inner.pending);
        let count = frames.len();
        let bytes = frames.concat();
        self.io.write_at(inner.written_end, &bytes)?;
        inner.written_end += bytes.len() as u64;
        inner.frames_written += count as u64;
        debug!(url = %self.url, frames = count, "plocal.write_pending");
        Ok(())
    }

    fn mark_clean(&self, inner: &mut Inner) -> Result<()> {
        inner.meta.clean = true;
        inner.meta.log_end = inner.written_end;
        store_meta(&self.io, &inner.meta)
    }
}

impl Storage for PlocalStorage {
    fn query(&self, stmt: &Statement) -> Result<ResultSet> {
        let inner = self.inner.lock();
        if inner.closed {
            return Err(UmbraError::StorageClosed);
        }
        inner.state.select(stmt)
    }

    fn execute_batch(&self, stmts: &[Statement]) -> Result<u64> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(UmbraError::StorageClosed);
        }
        let (ops, affected, next_state) = match stmts {
            [] => return Ok(0),
            [single] => {
                let (ops, affected) = inner.state.plan(single)?;
                (ops, affected, None)
            }
            many => {
                let mut scratch = inner.state.clone();
                let (ops, affected) = scratch.plan_batch(many)?;
                (ops, affected, Some(scratch))
            }
        };
        if ops.is_empty() {
            return Ok(affected);
        }

        let plain = serde_json::to_vec(&ops)?;
        let sealed = self
            .cipher
            .seal(&plain)
            .map_err(|_| UmbraError::Invalid("cipher failed to seal frame"))?;
        let frame = encode_frame(inner.meta.salt, inner.tail, &sealed)?;
        let len = frame.len() as u64;
        match self.sync_mode {
            SyncMode::Full | SyncMode::Normal => {
                self.write_pending(&mut inner)?;
                self.io.write_at(inner.written_end, &frame)?;
                if self.sync_mode == SyncMode::Full {
                    self.io.sync_all()?;
                }
                inner.written_end += len;
                inner.frames_written += 1;
            }
            SyncMode::Off => inner.pending.push(frame),
        }
        inner.tail += len;

        match next_state {
            Some(state) => inner.state = state,
            None => {
                for op in ops {
                    inner.state.apply(op)?;
                }
            }
        }
        debug!(url = %self.url, statements = stmts.len(), affected, "plocal.commit");
        Ok(affected)
    }

    fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(UmbraError::StorageClosed);
        }
        self.write_pending(&mut inner)?;
        self.io.sync_all()
    }

    fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        self.write_pending(&mut inner)?;
        self.io.sync_all()?;
        self.mark_clean(&mut inner)?;
        inner.closed = true;
        self.io.unlock()?;
        info!(url = %self.url, frames_written = inner.frames_written, "plocal.close");
        Ok(())
    }

    fn close_forced(&self, flush: bool, panic: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;
        if flush {
            self.write_pending(&mut inner)?;
            self.io.sync_all()?;
        } else {
            let dropped = inner.pending.len();
            inner.pending.clear();
            inner.tail = inner.written_end;
            if dropped > 0 {
                warn!(url = %self.url, frames = dropped, "plocal.close_forced.dropped_pending");
            }
        }
        if !panic {
            self.mark_clean(&mut inner)?;
        }
        self.io.unlock()?;
        warn!(url = %self.url, flush, panic, "plocal.close_forced");
        Ok(())
    }

    fn stats(&self) -> StorageStats {
        let inner = self.inner.lock();
        StorageStats {
            classes: inner.state.class_count(),
            records: inner.state.record_count(),
            frames_written: inner.frames_written,
            frames_pending: inner.pending.len(),
            frames_replayed: inner.frames_replayed,
            recovered: inner.recovered,
        }
    }
}

impl Drop for PlocalStorage {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(url = %self.url, error = %err, "plocal.drop.close_failed");
        }
    }
}
