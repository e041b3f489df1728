//! Local identity and the manager that creates it
//!
//! An [`Identity`] is immutable once built. Replacing the active identity
//! means building a new value (generation or keystore import) and swapping
//! it in whole; nothing here mutates key material in place.

use aes_gcm::aead::OsRng;
use p256::elliptic_curve::rand_core::CryptoRngCore;
use p256::PublicKey;
use std::fmt;
use tracing::{debug, info};

use super::fingerprint::Fingerprint;
use super::keypair::{ExportedKeypair, KeyRole, Keypair};
use super::IdentityError;
use crate::metrics::{self, Timer};
use crate::types::Timestamp;

/// Agreement keypair, signing keypair and the fingerprint derived from them
#[derive(Clone)]
pub struct Identity {
    agreement: Keypair,
    signing: Keypair,
    fingerprint: Fingerprint,
    created: Timestamp,
}

impl Identity {
    pub fn agreement_keypair(&self) -> &Keypair {
        &self.agreement
    }

    pub fn signing_keypair(&self) -> &Keypair {
        &self.signing
    }

    /// Fingerprint computed when this identity was generated or imported
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn created(&self) -> Timestamp {
        self.created
    }

    /// Uncompressed public agreement key, the value peers need
    pub fn public_agreement_key(&self) -> Vec<u8> {
        self.agreement.public_key_bytes()
    }

    pub fn public_signing_key(&self) -> Vec<u8> {
        self.signing.public_key_bytes()
    }

    /// Sign with the identity's signing key
    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, IdentityError> {
        self.signing.sign(msg)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("fingerprint", &self.fingerprint.hex)
            .field("created", &self.created)
            .finish_non_exhaustive()
    }
}

/// Creates, fingerprints, exports and restores identities
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityManager;

impl IdentityManager {
    /// Generate a fresh identity from the OS CSPRNG
    ///
    /// Runs on the blocking pool. Dropping the returned future abandons the
    /// result but the generation task still runs to completion, so no
    /// half-built key material is ever observable.
    pub async fn generate() -> Result<Identity, IdentityError> {
        tokio::task::spawn_blocking(|| Self::generate_with_rng(&mut OsRng))
            .await
            .map_err(|e| IdentityError::KeyGeneration(format!("generation task failed: {}", e)))?
    }

    /// Generate a fresh identity from `rng`
    pub fn generate_with_rng<R: CryptoRngCore>(rng: &mut R) -> Result<Identity, IdentityError> {
        let timer = Timer::new(metrics::IDENTITY_GENERATION_MS);

        let agreement = Keypair::generate(KeyRole::Agreement, rng)?;
        let signing = Keypair::generate(KeyRole::Signing, rng)?;
        let fingerprint = Self::fingerprint_of(agreement.public_key());

        timer.stop();
        metrics::record_counter(metrics::IDENTITY_GENERATED, 1);
        info!(fingerprint = %fingerprint.hex, "generated new identity");

        Ok(Identity {
            agreement,
            signing,
            fingerprint,
            created: Timestamp::now(),
        })
    }

    pub fn fingerprint_of(public_agreement_key: &PublicKey) -> Fingerprint {
        Fingerprint::of(public_agreement_key)
    }

    pub fn export_raw(keypair: &Keypair) -> Result<ExportedKeypair, IdentityError> {
        keypair.export_raw()
    }

    pub fn import_raw(exported: &ExportedKeypair, role: KeyRole) -> Result<Keypair, IdentityError> {
        Keypair::import_raw(exported, role)
    }

    /// Assemble an identity from imported keypairs
    ///
    /// The fingerprint is always recomputed from the agreement key; callers
    /// holding a stored fingerprint compare against the result.
    pub fn restore(
        agreement: Keypair,
        signing: Keypair,
        created: Timestamp,
    ) -> Result<Identity, IdentityError> {
        for (pair, expected) in [(&agreement, KeyRole::Agreement), (&signing, KeyRole::Signing)] {
            if pair.role() != expected {
                return Err(IdentityError::WrongRole {
                    expected,
                    actual: pair.role(),
                });
            }
        }

        let fingerprint = Self::fingerprint_of(agreement.public_key());
        debug!(fingerprint = %fingerprint.hex, "restored identity");

        Ok(Identity {
            agreement,
            signing,
            fingerprint,
            created,
        })
    }
}
