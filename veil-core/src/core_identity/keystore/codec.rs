//! Keystore interchange document
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "keyPair": { "publicKey": [4, ...], "privateKey": [48, ...] },
//!   "signingKeyPair": { "publicKey": [4, ...], "privateKey": [48, ...] },
//!   "fingerprint": { "emoji": "...", "hex": "A1B2:C3D4:E5F6:7890" },
//!   "created": 1718000000000,
//!   "protection": { "kdf": "argon2id", "salt": [...], "memoryKib": 19456, "iterations": 2, "parallelism": 1 }
//! }
//! ```
//!
//! `protection` is absent on cleartext keystores written by the web client.
//! When present, both `privateKey` arrays hold sealed bytes (see
//! [`super::protection`]).

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::protection::{KdfSettings, Passphrase, ProtectionParams, SealingKey};
use super::KeystoreError;
use crate::config::KeystoreConfig;
use crate::core_identity::fingerprint::Fingerprint;
use crate::core_identity::identity::{Identity, IdentityManager};
use crate::core_identity::keypair::{ExportedKeypair, KeyRole, Keypair};
use crate::metrics::{self, Timer};
use crate::types::Timestamp;

/// Only interchange version read or written
pub const KEYSTORE_VERSION: &str = "1.0";

/// Serialized identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreDocument {
    pub version: String,
    #[serde(rename = "keyPair")]
    pub key_pair: ExportedKeypair,
    #[serde(rename = "signingKeyPair")]
    pub signing_key_pair: ExportedKeypair,
    pub fingerprint: Fingerprint,
    pub created: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protection: Option<ProtectionParams>,
}

impl KeystoreDocument {
    pub fn is_protected(&self) -> bool {
        self.protection.is_some()
    }
}

/// Export file name for an identity created at `created`
pub fn keystore_filename(created: Timestamp) -> String {
    format!("eternal-veil-keystore-{}.json", created.as_millis())
}

/// Converts identities to and from [`KeystoreDocument`]s
#[derive(Debug, Clone)]
pub struct KeystoreCodec {
    kdf: KdfSettings,
    allow_cleartext_import: bool,
}

impl Default for KeystoreCodec {
    fn default() -> Self {
        Self::from_config(&KeystoreConfig::default())
    }
}

impl KeystoreCodec {
    pub fn new(kdf: KdfSettings, allow_cleartext_import: bool) -> Self {
        Self {
            kdf,
            allow_cleartext_import,
        }
    }

    pub fn from_config(config: &KeystoreConfig) -> Self {
        Self::new(KdfSettings::from(config), config.allow_cleartext_import)
    }

    /// Build the document for `identity`
    ///
    /// Without a passphrase the private keys are written in cleartext, which
    /// is only meant for interop with the legacy web client.
    pub fn encode(
        &self,
        identity: &Identity,
        passphrase: Option<&Passphrase>,
    ) -> Result<KeystoreDocument, KeystoreError> {
        let agreement = IdentityManager::export_raw(identity.agreement_keypair())?;
        let signing = IdentityManager::export_raw(identity.signing_keypair())?;

        let (key_pair, signing_key_pair, protection) = match passphrase {
            Some(passphrase) => {
                let key = self.derive_new(passphrase)?;
                let key_pair = seal_exported(&key, KeyRole::Agreement, &agreement)?;
                let signing_key_pair = seal_exported(&key, KeyRole::Signing, &signing)?;
                (key_pair, signing_key_pair, Some(key.params().clone()))
            }
            None => {
                warn!(
                    fingerprint = %identity.fingerprint().hex,
                    "encoding keystore without passphrase; private keys are in cleartext"
                );
                (agreement, signing, None)
            }
        };

        Ok(KeystoreDocument {
            version: KEYSTORE_VERSION.to_string(),
            key_pair,
            signing_key_pair,
            fingerprint: identity.fingerprint().clone(),
            created: identity.created(),
            protection,
        })
    }

    /// Encode and serialize to pretty JSON
    pub fn encode_to_vec(
        &self,
        identity: &Identity,
        passphrase: Option<&Passphrase>,
    ) -> Result<Vec<u8>, KeystoreError> {
        let document = self.encode(identity, passphrase)?;
        serde_json::to_vec_pretty(&document)
            .map_err(|e| KeystoreError::Serialization(e.to_string()))
    }

    /// Parse and import a serialized keystore
    pub fn decode(
        &self,
        serialized: &[u8],
        passphrase: Option<&Passphrase>,
    ) -> Result<Identity, KeystoreError> {
        let result = parse_document(serialized)
            .and_then(|document| self.decode_document(&document, passphrase));
        if let Err(e) = &result {
            metrics::record_counter(metrics::KEYSTORE_REJECTED, 1);
            debug!(error = %e, "keystore rejected");
        }
        result
    }

    /// Import an already-parsed document
    ///
    /// The stored fingerprint is verified against the imported agreement key,
    /// never trusted.
    pub fn decode_document(
        &self,
        document: &KeystoreDocument,
        passphrase: Option<&Passphrase>,
    ) -> Result<Identity, KeystoreError> {
        if document.version != KEYSTORE_VERSION {
            return Err(KeystoreError::InvalidKeystore(format!(
                "unsupported version: {}",
                document.version
            )));
        }
        if !document.fingerprint.is_well_formed() {
            return Err(KeystoreError::InvalidKeystore(
                "fingerprint is malformed".to_string(),
            ));
        }

        let (agreement, signing) = match (&document.protection, passphrase) {
            (Some(params), Some(passphrase)) => {
                let key = self.derive_for(passphrase, params)?;
                (
                    open_exported(&key, KeyRole::Agreement, &document.key_pair)?,
                    open_exported(&key, KeyRole::Signing, &document.signing_key_pair)?,
                )
            }
            (Some(_), None) => return Err(KeystoreError::PassphraseRequired),
            (None, _) if !self.allow_cleartext_import => {
                return Err(KeystoreError::InvalidKeystore(
                    "keystore is not passphrase protected".to_string(),
                ));
            }
            (None, _) => (
                IdentityManager::import_raw(&document.key_pair, KeyRole::Agreement)?,
                IdentityManager::import_raw(&document.signing_key_pair, KeyRole::Signing)?,
            ),
        };

        let identity = IdentityManager::restore(agreement, signing, document.created)?;

        if identity.fingerprint() != &document.fingerprint {
            warn!(
                stored = %document.fingerprint.hex,
                computed = %identity.fingerprint().hex,
                "keystore fingerprint mismatch"
            );
            return Err(KeystoreError::FingerprintMismatch);
        }

        metrics::record_counter(metrics::IDENTITY_IMPORTED, 1);
        info!(
            fingerprint = %identity.fingerprint().hex,
            protected = document.is_protected(),
            "imported identity from keystore"
        );
        Ok(identity)
    }

    fn derive_new(&self, passphrase: &Passphrase) -> Result<SealingKey, KeystoreError> {
        let timer = Timer::new(metrics::KEYSTORE_KDF_MS);
        let key = SealingKey::derive_new(passphrase, self.kdf);
        timer.stop();
        key
    }

    fn derive_for(
        &self,
        passphrase: &Passphrase,
        params: &ProtectionParams,
    ) -> Result<SealingKey, KeystoreError> {
        let timer = Timer::new(metrics::KEYSTORE_KDF_MS);
        let key = SealingKey::derive_for(passphrase, params);
        timer.stop();
        key
    }
}

/// Parse JSON into a document, describing failures without echoing input
fn parse_document(serialized: &[u8]) -> Result<KeystoreDocument, KeystoreError> {
    use serde_json::error::Category;

    serde_json::from_slice(serialized).map_err(|e| {
        let reason = match e.classify() {
            Category::Syntax | Category::Eof => {
                format!("not valid JSON (line {}, column {})", e.line(), e.column())
            }
            Category::Data => {
                let message = e.to_string();
                if message.starts_with("missing field") {
                    message
                        .split(" at line")
                        .next()
                        .unwrap_or("missing field")
                        .to_string()
                } else {
                    format!("malformed field (line {}, column {})", e.line(), e.column())
                }
            }
            Category::Io => "could not be read".to_string(),
        };
        KeystoreError::InvalidKeystore(reason)
    })
}

/// Sealed private keys are bound to their role and public key
fn sealing_aad(role: KeyRole, public_key: &[u8]) -> Vec<u8> {
    let mut aad = format!("eternal-veil-keystore:{}:", role).into_bytes();
    aad.extend_from_slice(public_key);
    aad
}

fn seal_exported(
    key: &SealingKey,
    role: KeyRole,
    exported: &ExportedKeypair,
) -> Result<ExportedKeypair, KeystoreError> {
    let sealed = key.seal(&exported.private_key, &sealing_aad(role, &exported.public_key))?;
    Ok(ExportedKeypair {
        public_key: exported.public_key.clone(),
        private_key: sealed,
    })
}

fn open_exported(
    key: &SealingKey,
    role: KeyRole,
    sealed: &ExportedKeypair,
) -> Result<Keypair, KeystoreError> {
    let private_key = key.open(&sealed.private_key, &sealing_aad(role, &sealed.public_key))?;
    let exported = ExportedKeypair {
        public_key: sealed.public_key.clone(),
        private_key: private_key.to_vec(),
    };
    Ok(IdentityManager::import_raw(&exported, role)?)
}
