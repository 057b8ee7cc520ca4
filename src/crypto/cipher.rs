use aes_gcm::aead::consts::U12;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, AeadCore, KeyInit};
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

use super::EncryptionMethod;
use crate::types::{Result, UmbraError};

pub(super) const DES_KEY_LEN: usize = 8;
const DES_BLOCK_LEN: usize = 8;
const GCM_NONCE_LEN: usize = 12;

type Aes192Gcm = AesGcm<Aes192, U12>;

/// Opaque decryption failure. Callers decide whether it means a wrong key
/// or damaged bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherFailure;

/// Seals and opens storage payloads.
///
/// Sealed output is self-contained: it carries its own nonce or IV.
pub trait PageCipher: Send + Sync {
    /// Cipher implemented by this instance.
    fn method(&self) -> EncryptionMethod;
    /// Encrypts `plaintext` under a fresh nonce.
    fn seal(&self, plaintext: &[u8]) -> std::result::Result<Vec<u8>, CipherFailure>;
    /// Decrypts output produced by [`PageCipher::seal`].
    fn open(&self, sealed: &[u8]) -> std::result::Result<Vec<u8>, CipherFailure>;
}

pub(super) fn build(method: EncryptionMethod, key: Option<&[u8]>) -> Result<Box<dyn PageCipher>> {
    match (method, key) {
        (EncryptionMethod::None, _) => Ok(Box::new(PlainCipher)),
        (EncryptionMethod::Aes, Some(key)) => Ok(Box::new(AesGcmCipher::new(key)?)),
        (EncryptionMethod::Des, Some(key)) => Ok(Box::new(DesCbcCipher::new(key)?)),
        (_, None) => Err(UmbraError::Invalid("cipher requires a key")),
    }
}

struct PlainCipher;

impl PageCipher for PlainCipher {
    fn method(&self) -> EncryptionMethod {
        EncryptionMethod::None
    }

    fn seal(&self, plaintext: &[u8]) -> std::result::Result<Vec<u8>, CipherFailure> {
        Ok(plaintext.to_vec())
    }

    fn open(&self, sealed: &[u8]) -> std::result::Result<Vec<u8>, CipherFailure> {
        Ok(sealed.to_vec())
    }
}

enum AesGcmCipher {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

impl AesGcmCipher {
    fn new(key: &[u8]) -> Result<Self> {
        let invalid = |_| UmbraError::KeyFormat(format!("aes key of {} bytes", key.len()));
        match key.len() {
            16 => Aes128Gcm::new_from_slice(key).map(Self::Aes128).map_err(invalid),
            24 => Aes192Gcm::new_from_slice(key).map(Self::Aes192).map_err(invalid),
            32 => Aes256Gcm::new_from_slice(key).map(Self::Aes256).map_err(invalid),
            other => Err(UmbraError::KeyFormat(format!("aes key of {other} bytes"))),
        }
    }
}

fn gcm_seal<C>(cipher: &C, plaintext: &[u8]) -> std::result::Result<Vec<u8>, CipherFailure>
where
    C: Aead + AeadCore<NonceSize = U12>,
{
    let mut nonce = [0u8; GCM_NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let body = cipher
        .encrypt(GenericArray::from_slice(&nonce), plaintext)
        .map_err(|_| CipherFailure)?;
    let mut out = Vec::with_capacity(GCM_NONCE_LEN + body.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&body);
    Ok(out)
}

fn gcm_open<C>(cipher: &C, sealed: &[u8]) -> std::result::Result<Vec<u8>, CipherFailure>
where
    C: Aead + AeadCore<NonceSize = U12>,
{
    if sealed.len() < GCM_NONCE_LEN {
        return Err(CipherFailure);
    }
    let (nonce, body) = sealed.split_at(GCM_NONCE_LEN);
    cipher
        .decrypt(GenericArray::from_slice(nonce), body)
        .map_err(|_| CipherFailure)
}

impl PageCipher for AesGcmCipher {
    fn method(&self) -> EncryptionMethod {
        EncryptionMethod::Aes
    }

    fn seal(&self, plaintext: &[u8]) -> std::result::Result<Vec<u8>, CipherFailure> {
        match self {
            AesGcmCipher::Aes128(c) => gcm_seal(c, plaintext),
            AesGcmCipher::Aes192(c) => gcm_seal(c, plaintext),
            AesGcmCipher::Aes256(c) => gcm_seal(c, plaintext),
        }
    }

    fn open(&self, sealed: &[u8]) -> std::result::Result<Vec<u8>, CipherFailure> {
        match self {
            AesGcmCipher::Aes128(c) => gcm_open(c, sealed),
            AesGcmCipher::Aes192(c) => gcm_open(c, sealed),
            AesGcmCipher::Aes256(c) => gcm_open(c, sealed),
        }
    }
}

/// DES uses the first eight key bytes; longer keys are accepted for
/// compatibility with storages created by tools that pass 16-byte keys.
struct DesCbcCipher {
    key: Zeroizing<[u8; DES_KEY_LEN]>,
}

type DesEncryptor = cbc::Encryptor<des::Des>;
type DesDecryptor = cbc::Decryptor<des::Des>;

impl DesCbcCipher {
    fn new(key: &[u8]) -> Result<Self> {
        if key.len() < DES_KEY_LEN {
            return Err(UmbraError::KeyFormat(format!("des key of {} bytes", key.len())));
        }
        let mut raw = Zeroizing::new([0u8; DES_KEY_LEN]);
        raw.copy_from_slice(&key[..DES_KEY_LEN]);
        Ok(Self { key: raw })
    }
}

impl PageCipher for DesCbcCipher {
    fn method(&self) -> EncryptionMethod {
        EncryptionMethod::Des
    }

    fn seal(&self, plaintext: &[u8]) -> std::result::Result<Vec<u8>, CipherFailure> {
        let mut iv = [0u8; DES_BLOCK_LEN];
        OsRng.fill_bytes(&mut iv);
        let encryptor =
            DesEncryptor::new_from_slices(self.key.as_slice(), &iv).map_err(|_| CipherFailure)?;
        let body = encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext);
        let mut out = Vec::with_capacity(DES_BLOCK_LEN + body.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn open(&self, sealed: &[u8]) -> std::result::Result<Vec<u8>, CipherFailure> {
        if sealed.len() < 2 * DES_BLOCK_LEN || sealed.len() % DES_BLOCK_LEN != 0 {
            return Err(CipherFailure);
        }
        let (iv, body) = sealed.split_at(DES_BLOCK_LEN);
        let decryptor =
            DesDecryptor::new_from_slices(self.key.as_slice(), iv).map_err(|_| CipherFailure)?;
        decryptor
            .decrypt_padded_vec_mut::<Pkcs7>(body)
            .map_err(|_| CipherFailure)
    }
}
