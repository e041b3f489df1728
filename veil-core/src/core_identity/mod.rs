//! Identity management module
//!
//! Everything that creates or carries long-term key material:
//!
//! - [`entropy`]: the user-driven entropy latch that gates generation
//! - [`keypair`]: P-256 agreement and signing keypairs, raw export/import
//! - [`fingerprint`]: the emoji and hex short forms of a public key
//! - [`identity`]: the immutable [`Identity`] and its [`IdentityManager`]
//! - [`keystore`]: the portable keystore document and local persistence

use thiserror::Error;

pub mod entropy;
pub mod fingerprint;
pub mod identity;
pub mod keypair;
pub mod keystore;

pub use entropy::{EntropyCollector, EntropyTicket, SampleOutcome};
pub use fingerprint::{Fingerprint, EMOJI_ALPHABET, FINGERPRINT_BYTES};
pub use identity::{Identity, IdentityManager};
pub use keypair::{ExportedKeypair, KeyRole, Keypair, PUBLIC_KEY_LEN, SIGNATURE_LEN};
pub use keystore::{
    keystore_filename, FileStore, KeyValueStore, KeystoreCodec, KeystoreDocument, KeystoreError,
    MemoryStore, Passphrase,
};

/// Identity-related errors
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Randomness source or curve primitive failed
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Key bytes malformed or for the wrong algorithm
    #[error("Key import failed: {0}")]
    KeyImport(String),

    /// Keypair used for something its role does not allow
    #[error("Wrong key role: expected {expected}, got {actual}")]
    WrongRole { expected: KeyRole, actual: KeyRole },
}
