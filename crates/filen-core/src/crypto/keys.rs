//! Key material types and derivation.
//!
//! The master key never leaves the process except inside the owner-only
//! credentials file. Both key types zeroize their bytes on drop and redact
//! their `Debug` output so they cannot leak through logs.

use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha512;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// PBKDF2-SHA512 iteration count for credential derivation.
pub const KDF_ITERATIONS: u32 = 200_000;

/// The user's root key. Encrypts metadata envelopes and keys the filename
/// HMAC; it is never sent to the backend.
#[derive(Clone)]
pub struct MasterKey(Zeroizing<[u8; 32]>);

impl MasterKey {
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let raw = hex::decode(hex_str)
            .map_err(|_| Error::Auth("master key is not valid hex".into()))?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| Error::Auth("master key must be 32 bytes".into()))?;
        Ok(Self::from_bytes(bytes))
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_ref())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("MasterKey").field(&"[REDACTED]").finish()
    }
}

/// A random 256-bit key unique to one file, encrypting its chunks. The hex
/// form travels inside the file's metadata envelope.
#[derive(Clone)]
pub struct ContentKey(Zeroizing<[u8; 32]>);

impl ContentKey {
    /// Generate a fresh key from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(Zeroizing::new(bytes))
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let raw = hex::decode(hex_str).map_err(|_| Error::CryptoAuth {
            what: "content key (invalid hex)".into(),
        })?;
        let bytes: [u8; 32] = raw.try_into().map_err(|_| Error::CryptoAuth {
            what: "content key (wrong length)".into(),
        })?;
        Ok(Self(Zeroizing::new(bytes)))
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_ref())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ContentKey").field(&"[REDACTED]").finish()
    }
}

/// Output of [`derive_keys`]: the master key plus the authentication token
/// the backend sees in its place.
pub struct DerivedKeys {
    pub master_key: MasterKey,
    /// Hex of the second 32 bytes of the KDF output. This is the only part
    /// of the derivation ever shown to the backend.
    pub auth_token: String,
}

/// Derive the master key and auth token from the user secret.
///
/// PBKDF2-SHA512, 200,000 iterations, 64-byte output: the first 32 bytes
/// become the master key, the remainder the auth token.
#[must_use]
pub fn derive_keys(secret: &str, salt: &str) -> DerivedKeys {
    let mut output = Zeroizing::new([0u8; 64]);
    pbkdf2_hmac::<Sha512>(
        secret.as_bytes(),
        salt.as_bytes(),
        KDF_ITERATIONS,
        output.as_mut(),
    );

    let mut master = [0u8; 32];
    master.copy_from_slice(&output[..32]);

    DerivedKeys {
        master_key: MasterKey::from_bytes(master),
        auth_token: hex::encode(&output[32..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let a = derive_keys("hunter2", "salt@example.com");
        let b = derive_keys("hunter2", "salt@example.com");
        assert_eq!(a.master_key.to_hex(), b.master_key.to_hex());
        assert_eq!(a.auth_token, b.auth_token);
    }

    #[test]
    fn salt_and_secret_both_matter() {
        let base = derive_keys("hunter2", "salt-a");
        let other_salt = derive_keys("hunter2", "salt-b");
        let other_secret = derive_keys("hunter3", "salt-a");
        assert_ne!(base.auth_token, other_salt.auth_token);
        assert_ne!(base.auth_token, other_secret.auth_token);
        assert_ne!(base.master_key.to_hex(), other_salt.master_key.to_hex());
    }

    #[test]
    fn master_key_hex_round_trip() {
        let key = derive_keys("pw", "s").master_key;
        let restored = MasterKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(key.as_bytes(), restored.as_bytes());
    }

    #[test]
    fn debug_output_is_redacted() {
        let key = MasterKey::from_bytes([7u8; 32]);
        let rendered = format!("{key:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("07"));
    }

    #[test]
    fn content_keys_are_unique() {
        assert_ne!(
            ContentKey::generate().to_hex(),
            ContentKey::generate().to_hex()
        );
    }
}
