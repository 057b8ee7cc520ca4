//! Encryption configuration and resolution from connection properties.
//!
//! Resolution is pure: it never touches storage. Whether a resolved key
//! actually matches a storage file is decided later, when the engine opens
//! the file and checks its key-check block (see [`KeyCheck`]).

mod cipher;

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;
use zeroize::Zeroizing;

use crate::config::{ConnectionProperties, STORAGE_ENCRYPTION_KEY, STORAGE_ENCRYPTION_METHOD};
use crate::types::{Result, UmbraError};

pub use cipher::{CipherFailure, PageCipher};

/// At-rest cipher applied to a storage file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EncryptionMethod {
    /// Plaintext storage.
    None,
    /// AES-GCM with a 128, 192 or 256 bit key.
    Aes,
    /// DES-CBC with PKCS#7 padding.
    Des,
}

impl EncryptionMethod {
    /// Parses a method name, ignoring case.
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "aes" => Ok(EncryptionMethod::Aes),
            "des" => Ok(EncryptionMethod::Des),
            "none" | "nothing" => Ok(EncryptionMethod::None),
            other => Err(UmbraError::Config(format!(
                "unsupported encryption method '{other}'"
            ))),
        }
    }

    /// Lowercase method name.
    pub fn as_str(self) -> &'static str {
        match self {
            EncryptionMethod::None => "none",
            EncryptionMethod::Aes => "aes",
            EncryptionMethod::Des => "des",
        }
    }

    pub(crate) fn id(self) -> u8 {
        match self {
            EncryptionMethod::None => 0,
            EncryptionMethod::Aes => 1,
            EncryptionMethod::Des => 2,
        }
    }

    pub(crate) fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(EncryptionMethod::None),
            1 => Ok(EncryptionMethod::Aes),
            2 => Ok(EncryptionMethod::Des),
            _ => Err(UmbraError::Corruption("unknown cipher id in meta page")),
        }
    }

    fn check_key_len(self, len: usize) -> Result<()> {
        let ok = match self {
            EncryptionMethod::None => false,
            EncryptionMethod::Aes => matches!(len, 16 | 24 | 32),
            EncryptionMethod::Des => len >= cipher::DES_KEY_LEN,
        };
        if ok {
            return Ok(());
        }
        let expected = match self {
            EncryptionMethod::None => "no key",
            EncryptionMethod::Aes => "16, 24 or 32 bytes",
            EncryptionMethod::Des => "at least 8 bytes",
        };
        Err(UmbraError::KeyFormat(format!(
            "{} key decodes to {len} bytes, expected {expected}",
            self.as_str()
        )))
    }
}

impl fmt::Display for EncryptionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw key bytes, wiped from memory on drop.
#[derive(Clone)]
pub struct EncryptionKey(Zeroizing<Vec<u8>>);

impl EncryptionKey {
    /// Decodes a standard, padded base64 key.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|err| UmbraError::KeyFormat(format!("not valid base64: {err}")))?;
        Ok(Self(Zeroizing::new(bytes)))
    }

    /// Wraps raw key bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(Zeroizing::new(bytes.to_vec()))
    }

    /// Borrow the key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Key length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for a zero-length key.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey(<{} bytes redacted>)", self.len())
    }
}

/// Resolved `{method, key}` pair handed to the storage engine at open time.
#[derive(Clone, Debug)]
pub struct EncryptionConfig {
    method: EncryptionMethod,
    key: Option<EncryptionKey>,
}

impl EncryptionConfig {
    /// Unencrypted storage.
    pub fn none() -> Self {
        Self {
            method: EncryptionMethod::None,
            key: None,
        }
    }

    /// Builds a validated config. `None` takes no key; the ciphers require one
    /// of a length they accept.
    pub fn new(method: EncryptionMethod, key: Option<EncryptionKey>) -> Result<Self> {
        match (method, key) {
            (EncryptionMethod::None, None) => Ok(Self::none()),
            (EncryptionMethod::None, Some(_)) => Err(UmbraError::Config(
                "an encryption key was supplied but the method is 'none'".into(),
            )),
            (method, None) => Err(UmbraError::Config(format!(
                "encryption method '{method}' requires a key"
            ))),
            (method, Some(key)) => {
                method.check_key_len(key.len())?;
                Ok(Self {
                    method,
                    key: Some(key),
                })
            }
        }
    }

    /// The cipher selected for the storage.
    pub fn method(&self) -> EncryptionMethod {
        self.method
    }

    /// The key, if any.
    pub fn key(&self) -> Option<&EncryptionKey> {
        self.key.as_ref()
    }

    /// Returns true unless the method is [`EncryptionMethod::None`].
    pub fn is_encrypted(&self) -> bool {
        self.method != EncryptionMethod::None
    }

    /// Instantiates the cipher for this configuration.
    pub fn cipher(&self) -> Result<Box<dyn PageCipher>> {
        cipher::build(self.method, self.key.as_ref().map(EncryptionKey::as_bytes))
    }
}

/// Resolves the encryption settings carried by `props`.
///
/// A method without a key resolves to [`EncryptionMethod::None`]. A key
/// without a method resolves to [`EncryptionMethod::Aes`].
pub fn resolve_encryption(props: &ConnectionProperties) -> Result<EncryptionConfig> {
    let key = props
        .get(STORAGE_ENCRYPTION_KEY)
        .map(str::trim)
        .filter(|k| !k.is_empty());
    let method = props
        .get(STORAGE_ENCRYPTION_METHOD)
        .map(str::trim)
        .filter(|m| !m.is_empty());

    let Some(encoded) = key else {
        if let Some(name) = method {
            debug!(method = name, "crypto.resolve.method_without_key");
        }
        return Ok(EncryptionConfig::none());
    };
    let method = match method {
        Some(name) => EncryptionMethod::parse(name)?,
        None => EncryptionMethod::Aes,
    };
    let key = EncryptionKey::from_base64(encoded)?;
    EncryptionConfig::new(method, Some(key))
}

const KEY_CHECK_MAGIC: &[u8; 16] = b"umbra.key-check2";
const KEY_CHECK_LEN: usize = 16 + 8 + 32;

type KeyDigest = Hmac<Sha256>;

/// Known plaintext sealed into the meta page at creation.
///
/// The plaintext is the magic, the salt and an HMAC-SHA256 of both keyed by
/// every byte of the supplied key. Opening the sealed block with a different
/// method or key either fails or yields different bytes, even when the cipher
/// itself only consumes part of the key (DES uses the first eight bytes and
/// ignores their parity bits).
pub struct KeyCheck;

impl KeyCheck {
    fn plaintext(key: Option<&EncryptionKey>, salt: u64) -> Result<[u8; KEY_CHECK_LEN]> {
        let mut out = [0u8; KEY_CHECK_LEN];
        out[..16].copy_from_slice(KEY_CHECK_MAGIC);
        out[16..24].copy_from_slice(&salt.to_be_bytes());
        let key_bytes = key.map(EncryptionKey::as_bytes).unwrap_or_default();
        let mut mac = <KeyDigest as Mac>::new_from_slice(key_bytes)
            .map_err(|_| UmbraError::Invalid("key check digest rejected the key"))?;
        mac.update(&out[..24]);
        out[24..].copy_from_slice(&mac.finalize().into_bytes());
        Ok(out)
    }

    /// Seals the check block for a storage with `salt` under `cipher` and `key`.
    pub fn seal(
        cipher: &dyn PageCipher,
        key: Option<&EncryptionKey>,
        salt: u64,
    ) -> Result<Vec<u8>> {
        let plain = Self::plaintext(key, salt)?;
        cipher
            .seal(&plain)
            .map_err(|_| UmbraError::Invalid("cipher failed to seal key check"))
    }

    /// Returns true if `sealed` opens to the plaintext expected for `key`.
    pub fn verify(
        cipher: &dyn PageCipher,
        key: Option<&EncryptionKey>,
        salt: u64,
        sealed: &[u8],
    ) -> bool {
        let Ok(expected) = Self::plaintext(key, salt) else {
            return false;
        };
        match cipher.open(sealed) {
            Ok(plain) => plain.as_slice() == expected.as_slice(),
            Err(CipherFailure) => false,
        }
    }
}
