//! Cryptographic primitives: authenticated chunk encryption, the metadata
//! envelope, filename hashing, and streaming file hashing.
//!
//! All symmetric encryption is AES-256-GCM with a 12-byte IV drawn fresh
//! from the OS RNG per operation and a 16-byte tag appended by the cipher.
//! The wire layout is always `iv ∥ ciphertext ∥ tag`.

pub mod keys;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};
use tracing::warn;

use crate::error::{Error, Result};

pub use keys::{derive_keys, ContentKey, DerivedKeys, MasterKey, KDF_ITERATIONS};

/// IV length for AES-GCM, in bytes.
pub const IV_LEN: usize = 12;
/// GCM authentication tag length, in bytes.
pub const TAG_LEN: usize = 16;
/// Version prefix of the metadata envelope format this client writes.
pub const ENVELOPE_VERSION: &str = "002";

/// Encrypt one plaintext chunk. Output is `iv ∥ ciphertext ∥ tag`.
pub fn encrypt_chunk(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| Error::Fatal("chunk encryption failed".into()))?;

    let mut blob = Vec::with_capacity(IV_LEN + ciphertext.len());
    blob.extend_from_slice(&iv);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt one chunk blob of the form `iv ∥ ciphertext ∥ tag`.
///
/// A blob too short to carry IV and tag is reported as structurally
/// corrupt; a tag verification failure as tampering or a wrong key.
pub fn decrypt_chunk(key: &[u8; 32], blob: &[u8]) -> Result<Vec<u8>> {
    decrypt_chunk_at(key, blob, 0)
}

/// [`decrypt_chunk`] with the chunk index carried into error context.
pub fn decrypt_chunk_at(key: &[u8; 32], blob: &[u8], index: u64) -> Result<Vec<u8>> {
    if blob.len() < IV_LEN + TAG_LEN {
        return Err(Error::CorruptChunk {
            index,
            len: blob.len(),
        });
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(&blob[..IV_LEN]);

    cipher.decrypt(nonce, &blob[IV_LEN..]).map_err(|_| {
        warn!(chunk = index, "chunk authentication tag mismatch");
        Error::CryptoAuth {
            what: format!("chunk {index}"),
        }
    })
}

/// Wrap a metadata JSON string into a versioned envelope:
/// `"002" ∥ base64(iv ∥ ciphertext ∥ tag)`.
pub fn wrap_metadata(key: &[u8; 32], json: &str) -> Result<String> {
    let blob = encrypt_chunk(key, json.as_bytes())?;
    Ok(format!("{ENVELOPE_VERSION}{}", BASE64.encode(blob)))
}

/// Unwrap a metadata envelope back into its JSON string.
///
/// Envelopes whose three-byte version prefix is not recognized are
/// rejected as a distinct error kind so callers can tell a format
/// mismatch from tampering.
pub fn unwrap_metadata(key: &[u8; 32], envelope: &str) -> Result<String> {
    let version = envelope.get(..3).unwrap_or(envelope);
    if version != ENVELOPE_VERSION {
        return Err(Error::CryptoVersion {
            version: version.to_string(),
        });
    }

    let blob = BASE64
        .decode(&envelope[3..])
        .map_err(|_| Error::CryptoAuth {
            what: "metadata envelope (invalid base64)".into(),
        })?;

    let plaintext = decrypt_chunk(key, &blob).map_err(|e| match e {
        Error::CorruptChunk { .. } => Error::CryptoAuth {
            what: "metadata envelope (truncated)".into(),
        },
        Error::CryptoAuth { .. } => Error::CryptoAuth {
            what: "metadata envelope".into(),
        },
        other => other,
    })?;

    String::from_utf8(plaintext).map_err(|_| Error::CryptoAuth {
        what: "metadata envelope (non-UTF-8 plaintext)".into(),
    })
}

/// Hash a plaintext name for server-side lookup.
///
/// HMAC-SHA-256 keyed with `UTF-8(master_key_hex ∥ email)`. Lookup only;
/// carries no authorization weight.
#[must_use]
pub fn hash_name(master_key: &MasterKey, email: &str, name: &str) -> String {
    let mut key_material = master_key.to_hex();
    key_material.push_str(email);

    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key_material.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(name.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Incremental SHA-512 hasher for whole-file plaintext.
///
/// Fed with each plaintext chunk before encryption (upload) or after
/// decryption (download). On resume the hasher is rebuilt by re-reading
/// the plaintext prefix from local disk; hasher state is never persisted.
#[derive(Default)]
pub struct FileHasher(Sha512);

impl FileHasher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.0.update(chunk);
    }

    #[must_use]
    pub fn finalize_hex(self) -> String {
        hex::encode(self.0.finalize())
    }
}

/// One-shot SHA-512 of a byte slice, hex-encoded.
#[must_use]
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = FileHasher::new();
    hasher.update(data);
    hasher.finalize_hex()
}
