//! Passphrase sealing for keystore private keys
//!
//! Each private key is sealed independently:
//!
//! ```text
//! [nonce: 12 bytes][AES-256-GCM ciphertext + tag]
//! ```
//!
//! The AES key comes from Argon2id over the passphrase and a per-keystore
//! salt. Parameters travel in the document's `protection` block so a
//! keystore stays readable after the local defaults change.

use super::KeystoreError;
use crate::config::KeystoreConfig;
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use argon2::{Argon2, Params};
use p256::elliptic_curve::rand_core::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Passphrase supplied by the user at export or import time
pub type Passphrase = SecretString;

/// Only KDF currently written or accepted
pub const KDF_ARGON2ID: &str = "argon2id";

/// Salt length for Argon2 KDF (16 bytes = 128 bits)
pub const SALT_LEN: usize = 16;

/// Nonce length for AES-GCM (12 bytes = 96 bits)
pub const NONCE_LEN: usize = 12;

const KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;

// Upper bounds on parameters read from untrusted documents
const MAX_MEMORY_KIB: u32 = 1024 * 1024;
const MAX_ITERATIONS: u32 = 64;
const MAX_PARALLELISM: u32 = 16;

/// Argon2id cost settings used when sealing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfSettings {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfSettings {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024, // 19 MiB memory cost
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl From<&KeystoreConfig> for KdfSettings {
    fn from(config: &KeystoreConfig) -> Self {
        Self {
            memory_kib: config.memory_kib,
            iterations: config.iterations,
            parallelism: config.parallelism,
        }
    }
}

/// The `protection` block of a sealed keystore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionParams {
    pub kdf: String,
    pub salt: Vec<u8>,
    #[serde(rename = "memoryKib")]
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl ProtectionParams {
    fn settings(&self) -> KdfSettings {
        KdfSettings {
            memory_kib: self.memory_kib,
            iterations: self.iterations,
            parallelism: self.parallelism,
        }
    }

    /// Reject parameters we would not have written ourselves
    fn validate(&self) -> Result<(), KeystoreError> {
        if self.kdf != KDF_ARGON2ID {
            return Err(KeystoreError::InvalidKeystore(format!(
                "unsupported protection kdf: {}",
                self.kdf
            )));
        }
        if self.salt.len() != SALT_LEN {
            return Err(KeystoreError::InvalidKeystore(format!(
                "protection salt must be {} bytes",
                SALT_LEN
            )));
        }
        if self.memory_kib > MAX_MEMORY_KIB
            || self.iterations == 0
            || self.iterations > MAX_ITERATIONS
            || self.parallelism == 0
            || self.parallelism > MAX_PARALLELISM
        {
            return Err(KeystoreError::InvalidKeystore(
                "protection cost parameters out of range".to_string(),
            ));
        }
        Ok(())
    }
}

/// AES-256 key derived from a passphrase, with the parameters that produced it
pub(crate) struct SealingKey {
    key: Zeroizing<[u8; KEY_LEN]>,
    params: ProtectionParams,
}

impl SealingKey {
    /// Derive a key under a fresh random salt
    pub(crate) fn derive_new(
        passphrase: &Passphrase,
        settings: KdfSettings,
    ) -> Result<Self, KeystoreError> {
        let mut salt = vec![0u8; SALT_LEN];
        OsRng
            .try_fill_bytes(&mut salt)
            .map_err(|e| KeystoreError::Protection(format!("Salt generation failed: {}", e)))?;

        let params = ProtectionParams {
            kdf: KDF_ARGON2ID.to_string(),
            salt,
            memory_kib: settings.memory_kib,
            iterations: settings.iterations,
            parallelism: settings.parallelism,
        };
        let key = derive_key_from_passphrase(passphrase, &params.salt, settings)?;
        Ok(Self { key, params })
    }

    /// Re-derive the key recorded by a document's `protection` block
    pub(crate) fn derive_for(
        passphrase: &Passphrase,
        params: &ProtectionParams,
    ) -> Result<Self, KeystoreError> {
        params.validate()?;
        let key = derive_key_from_passphrase(passphrase, &params.salt, params.settings())?;
        Ok(Self {
            key,
            params: params.clone(),
        })
    }

    pub(crate) fn params(&self) -> &ProtectionParams {
        &self.params
    }

    /// Seal `plaintext`, binding it to `aad`
    pub(crate) fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, KeystoreError> {
        let cipher = Aes256Gcm::new_from_slice(self.key.as_slice())
            .map_err(|e| KeystoreError::Protection(format!("Invalid key: {}", e)))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(|e| KeystoreError::Protection(format!("Nonce generation failed: {}", e)))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, Payload { msg: plaintext, aad })
            .map_err(|e| KeystoreError::Protection(format!("Encryption failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open bytes produced by [`SealingKey::seal`]
    ///
    /// A tag mismatch means either the wrong passphrase or a modified document;
    /// the two are indistinguishable and both report `WrongPassphrase`.
    pub(crate) fn open(
        &self,
        sealed: &[u8],
        aad: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KeystoreError> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(KeystoreError::InvalidKeystore(
                "sealed private key is truncated".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new_from_slice(self.key.as_slice())
            .map_err(|e| KeystoreError::Protection(format!("Invalid key: {}", e)))?;

        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), Payload { msg: ciphertext, aad })
            .map(Zeroizing::new)
            .map_err(|_| KeystoreError::WrongPassphrase)
    }
}

/// Derive 256-bit encryption key from passphrase using Argon2id
fn derive_key_from_passphrase(
    passphrase: &Passphrase,
    salt: &[u8],
    settings: KdfSettings,
) -> Result<Zeroizing<[u8; KEY_LEN]>, KeystoreError> {
    let params = Params::new(
        settings.memory_kib,
        settings.iterations,
        settings.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| KeystoreError::Protection(format!("Invalid Argon2 params: {}", e)))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(passphrase.expose_secret().as_bytes(), salt, key.as_mut_slice())
        .map_err(|e| KeystoreError::Protection(format!("Key derivation failed: {}", e)))?;

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Minimum Argon2 cost keeps the tests fast
    fn fast_settings() -> KdfSettings {
        KdfSettings {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn passphrase(s: &str) -> Passphrase {
        SecretString::new(s.to_string())
    }

    #[test]
    fn test_seal_and_open() {
        let key = SealingKey::derive_new(&passphrase("correct horse"), fast_settings()).unwrap();
        let sealed = key.seal(b"private key bytes", b"agreement").unwrap();

        let reopened = SealingKey::derive_for(&passphrase("correct horse"), key.params()).unwrap();
        let opened = reopened.open(&sealed, b"agreement").unwrap();
        assert_eq!(opened.as_slice(), b"private key bytes");
    }

    #[test]
    fn test_wrong_passphrase() {
        let key = SealingKey::derive_new(&passphrase("correct horse"), fast_settings()).unwrap();
        let sealed = key.seal(b"private key bytes", b"agreement").unwrap();

        let wrong = SealingKey::derive_for(&passphrase("battery staple"), key.params()).unwrap();
        assert!(matches!(
            wrong.open(&sealed, b"agreement"),
            Err(KeystoreError::WrongPassphrase)
        ));
    }

    #[test]
    fn test_aad_binds_role() {
        let key = SealingKey::derive_new(&passphrase("pw"), fast_settings()).unwrap();
        let sealed = key.seal(b"private key bytes", b"agreement").unwrap();

        assert!(matches!(
            key.open(&sealed, b"signing"),
            Err(KeystoreError::WrongPassphrase)
        ));
    }

    #[test]
    fn test_corrupted_aead_tag() {
        let key = SealingKey::derive_new(&passphrase("pw"), fast_settings()).unwrap();
        let mut sealed = key.seal(b"private key bytes", b"aad").unwrap();

        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;

        assert!(matches!(
            key.open(&sealed, b"aad"),
            Err(KeystoreError::WrongPassphrase)
        ));
    }

    #[test]
    fn test_truncated_sealed_bytes() {
        let key = SealingKey::derive_new(&passphrase("pw"), fast_settings()).unwrap();
        let sealed = key.seal(b"x", b"aad").unwrap();

        assert!(matches!(
            key.open(&sealed[..NONCE_LEN + 4], b"aad"),
            Err(KeystoreError::InvalidKeystore(_))
        ));
    }

    #[test]
    fn test_nonce_uniqueness() {
        let key = SealingKey::derive_new(&passphrase("pw"), fast_settings()).unwrap();
        let a = key.seal(b"same", b"aad").unwrap();
        let b = key.seal(b"same", b"aad").unwrap();

        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_fresh_salt_per_derivation() {
        let a = SealingKey::derive_new(&passphrase("pw"), fast_settings()).unwrap();
        let b = SealingKey::derive_new(&passphrase("pw"), fast_settings()).unwrap();
        assert_ne!(a.params().salt, b.params().salt);
    }

    #[test]
    fn test_untrusted_params_rejected() {
        let key = SealingKey::derive_new(&passphrase("pw"), fast_settings()).unwrap();

        let mut params = key.params().clone();
        params.kdf = "scrypt".to_string();
        assert!(matches!(
            SealingKey::derive_for(&passphrase("pw"), &params),
            Err(KeystoreError::InvalidKeystore(_))
        ));

        let mut params = key.params().clone();
        params.memory_kib = u32::MAX;
        assert!(matches!(
            SealingKey::derive_for(&passphrase("pw"), &params),
            Err(KeystoreError::InvalidKeystore(_))
        ));

        let mut params = key.params().clone();
        params.salt.truncate(4);
        assert!(matches!(
            SealingKey::derive_for(&passphrase("pw"), &params),
            Err(KeystoreError::InvalidKeystore(_))
        ));
    }
}
