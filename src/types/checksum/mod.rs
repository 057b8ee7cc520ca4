#![forbid(unsafe_code)]

/// Incremental CRC32 used where a payload is assembled from several slices.
#[derive(Default)]
pub struct Crc32Fast {
    inner: crc32fast::Hasher,
}

impl Crc32Fast {
    /// Feeds more bytes into the running checksum.
    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    /// Returns the checksum of everything fed so far without consuming the state.
    pub fn finalize(&self) -> u32 {
        self.inner.clone().finalize()
    }
}

/// CRC32 over `payload`, bound to a storage salt and a file position so a
/// block copied to another offset or another storage fails verification.
pub fn salted_crc32(salt: u64, position: u64, payload: &[u8]) -> u32 {
    let mut hasher = Crc32Fast::default();
    hasher.update(&salt.to_be_bytes());
    hasher.update(&position.to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}
