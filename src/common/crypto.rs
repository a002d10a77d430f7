//! # Crypto Helper
//!
//! Key generation and message sealing for the peer control plane.
//!
//! Every peer owns one long-lived 256-bit [`SymmetricKey`] which all other
//! peers share. Messages addressed to a peer are sealed as JWE compact
//! serialization:
//!
//! ```text
//! BASE64URL(header) . BASE64URL(wrapped key) . BASE64URL(iv) . BASE64URL(ciphertext) . BASE64URL(tag)
//! ```
//!
//! - `alg = "A256GCMKW"`: a fresh content key is wrapped with the peer key using
//!   AES-256-GCM; the wrap `iv` and `tag` travel in the protected header.
//! - `enc = "A256GCM"`: the payload is encrypted with the content key, using the
//!   ASCII protected header as additional authenticated data.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Key-management algorithm advertised in the protected header.
pub const KEY_ALGORITHM: &str = "A256GCMKW";
/// Content-encryption algorithm advertised in the protected header.
pub const CONTENT_ALGORITHM: &str = "A256GCM";

const KEY_LEN: usize = 32;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("entropy source failed: {0}")]
    Entropy(String),
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed - payload corrupted or wrong key")]
    DecryptionFailed,
    #[error("invalid compact serialization: {0}")]
    InvalidFormat(String),
    #[error("unsupported algorithm: alg={alg}, enc={enc}")]
    UnsupportedAlgorithm { alg: String, enc: String },
    #[error("key id mismatch: expected {expected}, got {actual}")]
    KeyMismatch { expected: String, actual: String },
}

/// A 256-bit shared secret tagged with an identifier.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymmetricKey {
    pub id: String,
    #[serde(serialize_with = "encode_key", deserialize_with = "decode_key")]
    key: [u8; KEY_LEN],
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("id", &self.id)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl SymmetricKey {
    /// Wrap existing key material.
    pub fn from_bytes(id: impl Into<String>, key: [u8; KEY_LEN]) -> Self {
        Self { id: id.into(), key }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key))
    }
}

fn encode_key<S: Serializer>(key: &[u8; KEY_LEN], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&URL_SAFE_NO_PAD.encode(key))
}

fn decode_key<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; KEY_LEN], D::Error> {
    let encoded = String::deserialize(deserializer)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| serde::de::Error::invalid_length(b.len(), &"32 key bytes"))
}

/// Generate a fresh random key tagged with `id`.
///
/// Fails only when the operating system entropy source is unavailable.
pub fn make_key(id: impl Into<String>) -> Result<SymmetricKey, CryptoError> {
    let mut key = [0u8; KEY_LEN];
    rand::rngs::OsRng
        .try_fill_bytes(&mut key)
        .map_err(|e| CryptoError::Entropy(e.to_string()))?;
    Ok(SymmetricKey::from_bytes(id, key))
}

/// Fill a buffer from the OS entropy source.
pub fn random_bytes(len: usize) -> Result<Vec<u8>, CryptoError> {
    let mut buf = vec![0u8; len];
    rand::rngs::OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| CryptoError::Entropy(e.to_string()))?;
    Ok(buf)
}

#[derive(Debug, Serialize, Deserialize)]
struct ProtectedHeader {
    alg: String,
    enc: String,
    kid: String,
    iv: String,
    tag: String,
}

/// Seals payloads for one peer key.
#[derive(Clone)]
pub struct Encrypter {
    key: SymmetricKey,
}

/// Opens payloads sealed for one peer key.
#[derive(Clone)]
pub struct Decrypter {
    key: SymmetricKey,
}

/// Build an encrypter bound to `key`.
pub fn get_encrypter(key: &SymmetricKey) -> Encrypter {
    Encrypter { key: key.clone() }
}

/// Build a decrypter bound to `key`.
pub fn get_decrypter(key: &SymmetricKey) -> Decrypter {
    Decrypter { key: key.clone() }
}

impl Encrypter {
    /// Encrypt `plaintext` and return the compact serialization.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let cek = Aes256Gcm::generate_key(&mut OsRng);

        // Wrap the content key with the shared peer key.
        let wrap_iv = Aes256Gcm::generate_nonce(&mut OsRng);
        let wrapped = self
            .key
            .cipher()
            .encrypt(&wrap_iv, cek.as_slice())
            .map_err(|_| CryptoError::EncryptionFailed)?;
        let (wrapped_key, wrap_tag) = wrapped.split_at(wrapped.len() - TAG_LEN);

        let header = ProtectedHeader {
            alg: KEY_ALGORITHM.to_string(),
            enc: CONTENT_ALGORITHM.to_string(),
            kid: self.key.id.clone(),
            iv: URL_SAFE_NO_PAD.encode(wrap_iv),
            tag: URL_SAFE_NO_PAD.encode(wrap_tag),
        };
        let header_json =
            serde_json::to_vec(&header).map_err(|_| CryptoError::EncryptionFailed)?;
        let header_b64 = URL_SAFE_NO_PAD.encode(header_json);

        let iv = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = Aes256Gcm::new(&cek)
            .encrypt(
                &iv,
                Payload {
                    msg: plaintext,
                    aad: header_b64.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        Ok(format!(
            "{}.{}.{}.{}.{}",
            header_b64,
            URL_SAFE_NO_PAD.encode(wrapped_key),
            URL_SAFE_NO_PAD.encode(iv),
            URL_SAFE_NO_PAD.encode(ciphertext),
            URL_SAFE_NO_PAD.encode(tag)
        ))
    }
}

impl Decrypter {
    /// Decrypt a compact serialization produced by an [`Encrypter`] holding the same key.
    pub fn decrypt(&self, compact: &str) -> Result<Vec<u8>, CryptoError> {
        let parts: Vec<&str> = compact.trim().split('.').collect();
        let [header_b64, wrapped_b64, iv_b64, ct_b64, tag_b64] = parts.as_slice() else {
            return Err(CryptoError::InvalidFormat(format!(
                "expected 5 segments, got {}",
                parts.len()
            )));
        };

        let header_json = decode_segment("header", header_b64)?;
        let header: ProtectedHeader = serde_json::from_slice(&header_json)
            .map_err(|e| CryptoError::InvalidFormat(format!("header: {e}")))?;

        if header.alg != KEY_ALGORITHM || header.enc != CONTENT_ALGORITHM {
            return Err(CryptoError::UnsupportedAlgorithm {
                alg: header.alg,
                enc: header.enc,
            });
        }
        if header.kid != self.key.id {
            return Err(CryptoError::KeyMismatch {
                expected: self.key.id.clone(),
                actual: header.kid,
            });
        }

        let wrap_iv = decode_fixed("wrap iv", &header.iv, IV_LEN)?;
        let mut wrapped = decode_segment("wrapped key", wrapped_b64)?;
        wrapped.extend_from_slice(&decode_fixed("wrap tag", &header.tag, TAG_LEN)?);

        let cek = self
            .key
            .cipher()
            .decrypt(Nonce::from_slice(&wrap_iv), wrapped.as_slice())
            .map_err(|_| CryptoError::DecryptionFailed)?;
        if cek.len() != KEY_LEN {
            return Err(CryptoError::DecryptionFailed);
        }

        let iv = decode_fixed("iv", iv_b64, IV_LEN)?;
        let mut sealed = decode_segment("ciphertext", ct_b64)?;
        sealed.extend_from_slice(&decode_fixed("tag", tag_b64, TAG_LEN)?);

        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&cek))
            .decrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &sealed,
                    aad: header_b64.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

fn decode_segment(name: &str, segment: &str) -> Result<Vec<u8>, CryptoError> {
    URL_SAFE_NO_PAD
        .decode(segment.as_bytes())
        .map_err(|e| CryptoError::InvalidFormat(format!("{name}: {e}")))
}

fn decode_fixed(name: &str, segment: &str, len: usize) -> Result<Vec<u8>, CryptoError> {
    let bytes = decode_segment(name, segment)?;
    if bytes.len() != len {
        return Err(CryptoError::InvalidFormat(format!(
            "{name}: expected {len} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}
