use std::io::ErrorKind;
use std::ops::Range;

use rand::{rngs::OsRng, RngCore};

use crate::crypto::EncryptionMethod;
use crate::primitives::io::FileIo;
use crate::types::{be_u16, be_u32, be_u64, salted_crc32, Result, UmbraError};

/// Size of the meta page at offset 0; the frame log starts right after it.
pub const META_LEN: usize = 256;

const META_MAGIC: [u8; 4] = *b"UMBR";
const META_FORMAT_VERSION: u16 = 1;
const MAX_KEY_CHECK_LEN: usize = 128;
const FLAG_CLEAN: u8 = 0b0000_0001;

const M_MAGIC: Range<usize> = 0..4;
const M_VERSION: Range<usize> = 4..6;
const M_CIPHER: usize = 6;
const M_FLAGS: usize = 7;
const M_SALT: Range<usize> = 8..16;
const M_LOG_END: Range<usize> = 16..24;
const M_KEY_CHECK_LEN: Range<usize> = 24..26;
const M_KEY_CHECK: Range<usize> = 32..32 + MAX_KEY_CHECK_LEN;
const M_CRC: Range<usize> = META_LEN - 4..META_LEN;

/// Decoded meta page.
///
/// The cipher id and the sealed key-check block are written once at creation.
/// `clean` and `log_end` change on every open and close.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Meta {
    /// Cipher the storage was created with.
    pub cipher: EncryptionMethod,
    /// Random per-storage salt mixed into every checksum.
    pub salt: u64,
    /// Set by a graceful close, cleared while the storage is open.
    pub clean: bool,
    /// End of the committed frame log, valid when `clean` is set.
    pub log_end: u64,
    /// Key-check plaintext sealed with the storage key.
    pub key_check: Vec<u8>,
}

impl Meta {
    /// Fresh meta for an empty storage with a random salt.
    pub fn fresh(cipher: EncryptionMethod) -> Self {
        Self {
            cipher,
            salt: OsRng.next_u64(),
            clean: true,
            log_end: META_LEN as u64,
            key_check: Vec::new(),
        }
    }

    /// Serializes into a page image with its checksum filled in.
    pub fn encode(&self) -> Result<[u8; META_LEN]> {
        if self.key_check.len() > MAX_KEY_CHECK_LEN {
            return Err(UmbraError::Invalid("key check block exceeds meta capacity"));
        }
        let mut buf = [0u8; META_LEN];
        buf[M_MAGIC].copy_from_slice(&META_MAGIC);
        buf[M_VERSION].copy_from_slice(&META_FORMAT_VERSION.to_be_bytes());
        buf[M_CIPHER] = self.cipher.id();
        buf[M_FLAGS] = if self.clean { FLAG_CLEAN } else { 0 };
        buf[M_SALT].copy_from_slice(&self.salt.to_be_bytes());
        buf[M_LOG_END].copy_from_slice(&self.log_end.to_be_bytes());
        buf[M_KEY_CHECK_LEN].copy_from_slice(&(self.key_check.len() as u16).to_be_bytes());
        buf[M_KEY_CHECK.start..M_KEY_CHECK.start + self.key_check.len()]
            .copy_from_slice(&self.key_check);
        let crc = salted_crc32(self.salt, 0, &buf);
        buf[M_CRC].copy_from_slice(&crc.to_be_bytes());
        Ok(buf)
    }

    /// Parses and verifies a page image.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < META_LEN {
            return Err(UmbraError::Corruption("meta page truncated"));
        }
        if buf[M_MAGIC] != META_MAGIC {
            return Err(UmbraError::Corruption("not an umbra storage file"));
        }
        if be_u16(buf, M_VERSION.start) != META_FORMAT_VERSION {
            return Err(UmbraError::Corruption("unsupported storage format version"));
        }
        let salt = be_u64(buf, M_SALT.start);
        let stored_crc = be_u32(buf, M_CRC.start);
        let mut image = [0u8; META_LEN];
        image.copy_from_slice(&buf[..META_LEN]);
        image[M_CRC].fill(0);
        if salted_crc32(salt, 0, &image) != stored_crc {
            return Err(UmbraError::Corruption("meta page crc mismatch"));
        }
        let key_check_len = be_u16(buf, M_KEY_CHECK_LEN.start) as usize;
        if key_check_len > MAX_KEY_CHECK_LEN {
            return Err(UmbraError::Corruption("key check length out of range"));
        }
        let log_end = be_u64(buf, M_LOG_END.start);
        if log_end < META_LEN as u64 {
            return Err(UmbraError::Corruption("log end precedes meta page"));
        }
        Ok(Self {
            cipher: EncryptionMethod::from_id(buf[M_CIPHER])?,
            salt,
            clean: buf[M_FLAGS] & FLAG_CLEAN != 0,
            log_end,
            key_check: buf[M_KEY_CHECK.start..M_KEY_CHECK.start + key_check_len].to_vec(),
        })
    }
}

/// Reads and verifies the meta page of `io`.
pub fn load_meta(io: &dyn FileIo) -> Result<Meta> {
    let mut buf = [0u8; META_LEN];
    match io.read_at(0, &mut buf) {
        Ok(()) => {}
        Err(UmbraError::Io(err)) if err.kind() == ErrorKind::UnexpectedEof => {
            return Err(UmbraError::Corruption("meta page truncated"));
        }
        Err(err) => return Err(err),
    }
    Meta::decode(&buf)
}

/// Writes `meta` to offset 0 and syncs the file.
pub fn store_meta(io: &dyn FileIo, meta: &Meta) -> Result<()> {
    let page = meta.encode()?;
    io.write_at(0, &page)?;
    io.sync_all()
}
