//! Connection properties and the bulk configuration object.
//!
//! Two entry points feed the same resolution path: individual
//! `set_property` calls on a factory, and a [`GraphConfig`] (usually loaded
//! from TOML) that is flattened into [`ConnectionProperties`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{Result, UmbraError};

/// Property naming the at-rest cipher (`aes`, `des`, `none`).
pub const STORAGE_ENCRYPTION_METHOD: &str = "storage.encryptionMethod";
/// Property carrying the base64 encoded encryption key.
pub const STORAGE_ENCRYPTION_KEY: &str = "storage.encryptionKey";
/// Property selecting the storage durability mode.
pub const STORAGE_SYNC_MODE: &str = "storage.syncMode";

const REDACTED: &str = "<redacted>";

/// Property bag attached to a factory or session.
///
/// Keys are unique and the last write wins. The encryption keys are
/// consumed by the core; everything else is carried along untouched.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionProperties {
    entries: BTreeMap<String, String>,
}

impl ConnectionProperties {
    /// Creates an empty property bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, returning the value it replaced.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(key.into(), value.into())
    }

    /// Looks up `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    /// Returns true if `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no property is set.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all properties in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Iterates over the properties the core does not consume itself.
    pub fn forwarded(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().filter(|(k, _)| !is_reserved(k))
    }
}

/// Returns true for property names consumed by encryption resolution.
pub fn is_reserved(key: &str) -> bool {
    key == STORAGE_ENCRYPTION_METHOD || key == STORAGE_ENCRYPTION_KEY
}

impl fmt::Debug for ConnectionProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in self.iter() {
            if key == STORAGE_ENCRYPTION_KEY {
                map.entry(&key, &REDACTED);
            } else {
                map.entry(&key, &value);
            }
        }
        map.finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConnectionProperties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = ConnectionProperties::new();
        for (k, v) in iter {
            props.set(k, v);
        }
        props
    }
}

/// Durability applied to committed frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Write and fsync every commit.
    #[default]
    Full,
    /// Write every commit; fsync on flush and close.
    Normal,
    /// Buffer commits in memory until flush or close.
    Off,
}

impl SyncMode {
    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Normal => "normal",
            SyncMode::Off => "off",
        }
    }

    /// Reads [`STORAGE_SYNC_MODE`] from `props`, defaulting to [`SyncMode::Full`].
    pub fn from_properties(props: &ConnectionProperties) -> Result<Self> {
        match props.get(STORAGE_SYNC_MODE) {
            Some(raw) if !raw.trim().is_empty() => raw.parse(),
            _ => Ok(SyncMode::default()),
        }
    }
}

impl FromStr for SyncMode {
    type Err = UmbraError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(SyncMode::Full),
            "normal" => Ok(SyncMode::Normal),
            "off" => Ok(SyncMode::Off),
            other => Err(UmbraError::Config(format!("unknown sync mode '{other}'"))),
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `[encryption]` section of a [`GraphConfig`].
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncryptionSettings {
    /// Cipher name; absent means AES when a key is given.
    pub method: Option<String>,
    /// Base64 encoded key.
    pub key: Option<String>,
}

impl fmt::Debug for EncryptionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionSettings")
            .field("method", &self.method)
            .field("key", &self.key.as_ref().map(|_| REDACTED))
            .finish()
    }
}

/// Bulk connection configuration.
///
/// ```toml
/// url = "plocal:/var/lib/umbra/people"
/// sync_mode = "normal"
///
/// [encryption]
/// method = "des"
/// key = "T1JJRU5UREJfSVNfQ09PTA=="
///
/// [properties]
/// "app.name" = "people"
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphConfig {
    /// Connection URL used when no URL is given explicitly.
    pub url: Option<String>,
    /// Durability mode.
    pub sync_mode: Option<SyncMode>,
    /// Encryption settings.
    pub encryption: EncryptionSettings,
    /// Additional raw properties.
    pub properties: BTreeMap<String, String>,
}

impl GraphConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|err| UmbraError::Config(format!("invalid config: {err}")))
    }

    /// Reads and parses the TOML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            UmbraError::Config(format!("cannot read config {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Sets the encryption key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.encryption.key = Some(key.into());
        self
    }

    /// Sets the encryption method name.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.encryption.method = Some(method.into());
        self
    }

    /// Sets the durability mode.
    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = Some(mode);
        self
    }

    /// Adds a raw property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Writes every setting into `props`. Typed fields win over raw properties
    /// with the same name.
    pub fn apply_to(&self, props: &mut ConnectionProperties) {
        for (key, value) in &self.properties {
            props.set(key.clone(), value.clone());
        }
        if let Some(mode) = self.sync_mode {
            props.set(STORAGE_SYNC_MODE, mode.as_str());
        }
        if let Some(method) = &self.encryption.method {
            props.set(STORAGE_ENCRYPTION_METHOD, method.clone());
        }
        if let Some(key) = &self.encryption.key {
            props.set(STORAGE_ENCRYPTION_KEY, key.clone());
        }
    }

    /// Flattens the configuration into a fresh property bag.
    pub fn to_properties(&self) -> ConnectionProperties {
        let mut props = ConnectionProperties::new();
        self.apply_to(&mut props);
        props
    }
}
