//! Keypair module
//!
//! P-256 key material for the two halves of an identity: an ECDH keypair for
//! session key agreement and an ECDSA keypair for signatures. Both use the
//! same curve and the same encodings as WebCrypto, so keystores move between
//! this core and the browser client unchanged:
//!
//! - public keys: uncompressed SEC1 point (65 bytes, `0x04 || X || Y`)
//! - private keys: PKCS#8 DER `PrivateKeyInfo`
//!
//! Secret scalars are zeroized on drop by `p256::SecretKey`.

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::rand_core::CryptoRngCore;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use p256::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::IdentityError;

/// Length of an uncompressed SEC1 P-256 point
pub const PUBLIC_KEY_LEN: usize = 65;

/// Length of a fixed-size (r || s) ECDSA P-256 signature
pub const SIGNATURE_LEN: usize = 64;

/// Rejection-sampling bound for scalars outside `[1, n)`
const MAX_SCALAR_ATTEMPTS: usize = 8;

/// What a keypair is allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyRole {
    /// ECDH on P-256
    Agreement,
    /// ECDSA on P-256 with SHA-256
    Signing,
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyRole::Agreement => f.write_str("agreement"),
            KeyRole::Signing => f.write_str("signing"),
        }
    }
}

/// Raw export of a keypair, as found in the keystore document
///
/// `private_key` is zeroized when the export is dropped.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct ExportedKeypair {
    #[serde(rename = "publicKey")]
    pub public_key: Vec<u8>,
    #[serde(rename = "privateKey")]
    pub private_key: Vec<u8>,
}

impl fmt::Debug for ExportedKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedKeypair")
            .field("public_key", &hex::encode(&self.public_key))
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// P-256 keypair bound to a role
#[derive(Clone)]
pub struct Keypair {
    role: KeyRole,
    secret: SecretKey,
    public: PublicKey,
}

impl Keypair {
    /// Generate a new keypair from `rng`
    ///
    /// RNG failures surface as [`IdentityError::KeyGeneration`] instead of
    /// panicking inside the curve library.
    pub fn generate<R: CryptoRngCore>(role: KeyRole, rng: &mut R) -> Result<Self, IdentityError> {
        let mut seed = Zeroizing::new([0u8; 32]);

        for _ in 0..MAX_SCALAR_ATTEMPTS {
            rng.try_fill_bytes(seed.as_mut())
                .map_err(|e| IdentityError::KeyGeneration(format!("random source failed: {}", e)))?;

            if let Ok(secret) = SecretKey::from_slice(seed.as_ref()) {
                let public = secret.public_key();
                return Ok(Keypair {
                    role,
                    secret,
                    public,
                });
            }
        }

        Err(IdentityError::KeyGeneration(
            "random source produced no valid scalar".to_string(),
        ))
    }

    /// Build a keypair from an existing secret
    pub fn from_secret(role: KeyRole, secret: SecretKey) -> Self {
        let public = secret.public_key();
        Keypair {
            role,
            secret,
            public,
        }
    }

    pub fn role(&self) -> KeyRole {
        self.role
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Uncompressed SEC1 encoding of the public key
    pub fn public_key_bytes(&self) -> Vec<u8> {
        encode_public_key(&self.public)
    }

    /// Secret scalar, for the session cipher only
    pub(crate) fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    /// Export as raw public point + PKCS#8 private key
    pub fn export_raw(&self) -> Result<ExportedKeypair, IdentityError> {
        let document = self
            .secret
            .to_pkcs8_der()
            .map_err(|_| IdentityError::KeyImport("private key could not be encoded".to_string()))?;

        Ok(ExportedKeypair {
            public_key: self.public_key_bytes(),
            private_key: document.as_bytes().to_vec(),
        })
    }

    /// Inverse of [`Keypair::export_raw`]
    ///
    /// Rejects keys on other curves or algorithms, and a public key that does
    /// not belong to the private key. Error text never echoes key bytes.
    pub fn import_raw(exported: &ExportedKeypair, role: KeyRole) -> Result<Self, IdentityError> {
        let secret = SecretKey::from_pkcs8_der(&exported.private_key).map_err(|_| {
            IdentityError::KeyImport(format!(
                "{} private key is not a PKCS#8 P-256 key",
                role
            ))
        })?;

        let public = parse_public_key(&exported.public_key).map_err(|_| {
            IdentityError::KeyImport(format!("{} public key is not a P-256 point", role))
        })?;

        if secret.public_key() != public {
            return Err(IdentityError::KeyImport(format!(
                "{} public key does not match its private key",
                role
            )));
        }

        Ok(Keypair {
            role,
            secret,
            public,
        })
    }

    /// Sign `msg` (ECDSA P-256, SHA-256), returning the 64-byte `r || s` form
    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, IdentityError> {
        if self.role != KeyRole::Signing {
            return Err(IdentityError::WrongRole {
                expected: KeyRole::Signing,
                actual: self.role,
            });
        }

        let signing_key = SigningKey::from(&self.secret);
        let signature: Signature = signing_key.sign(msg);
        Ok(signature.to_bytes().to_vec())
    }

    /// Verify a signature against an encoded public key
    ///
    /// Returns false for malformed keys or signatures rather than erroring.
    pub fn verify(public_key: &[u8], msg: &[u8], sig: &[u8]) -> bool {
        if sig.len() != SIGNATURE_LEN {
            return false;
        }

        let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(public_key) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(sig) else {
            return false;
        };

        verifying_key.verify(msg, &signature).is_ok()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("role", &self.role)
            .field("public", &hex::encode(self.public_key_bytes()))
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Parse a SEC1-encoded P-256 public key
pub fn parse_public_key(bytes: &[u8]) -> Result<PublicKey, IdentityError> {
    PublicKey::from_sec1_bytes(bytes)
        .map_err(|_| IdentityError::KeyImport("public key is not a P-256 point".to_string()))
}

/// Canonical (uncompressed SEC1) encoding of a public key
pub fn encode_public_key(public: &PublicKey) -> Vec<u8> {
    public.to_encoded_point(false).as_bytes().to_vec()
}
