//! Keystore module
//!
//! Portable serialized identities and where they live:
//!
//! - [`codec`]: the JSON interchange document (`eternal-veil-keystore-*.json`)
//! - [`protection`]: passphrase sealing of the private keys inside it
//! - [`kv_store`]: the `get`/`set` persistence abstraction the host provides

use thiserror::Error;

use super::IdentityError;

pub mod codec;
pub mod kv_store;
pub mod protection;

pub use codec::{keystore_filename, KeystoreCodec, KeystoreDocument, KEYSTORE_VERSION};
pub use kv_store::{FileStore, KeyValueStore, MemoryStore};
pub use protection::{KdfSettings, Passphrase, ProtectionParams};

/// Keystore errors
///
/// Messages name the failing field or check, never key bytes.
#[derive(Debug, Error)]
pub enum KeystoreError {
    /// Required fields missing, mistyped, or an unsupported version
    #[error("Invalid keystore: {0}")]
    InvalidKeystore(String),

    /// Stored fingerprint disagrees with the imported agreement key
    #[error("Keystore fingerprint does not match its agreement key")]
    FingerprintMismatch,

    /// Key bytes present but not usable P-256 keys
    #[error("Key import failed: {0}")]
    KeyImport(#[from] IdentityError),

    /// AEAD check on a sealed private key failed
    #[error("Wrong passphrase or corrupted keystore")]
    WrongPassphrase,

    /// Protected keystore opened without a passphrase
    #[error("Passphrase required to open this keystore")]
    PassphraseRequired,

    #[error("Protection error: {0}")]
    Protection(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
