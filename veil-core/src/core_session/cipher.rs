//! Session cipher
//!
//! ECDH on P-256 between the local agreement key and a peer's public
//! agreement key, then AES-256-GCM with a fresh 96-bit nonce per message.
//!
//! The session key is a pure function of the two keys: the same peer always
//! yields the same key. There is no per-message re-keying, so compromise of
//! either agreement key exposes every past and future message with that peer.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use p256::elliptic_curve::rand_core::RngCore;
use p256::elliptic_curve::subtle::ConstantTimeEq;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::config::SessionConfig;
use crate::core_identity::keypair::{parse_public_key, KeyRole, Keypair};
use crate::metrics;

/// AES-GCM nonce length (96 bits)
pub const NONCE_LEN: usize = 12;

/// AES-256 key length
pub const SESSION_KEY_LEN: usize = 32;

const HKDF_INFO: &[u8] = b"eternal-veil/session-key/v1";

/// Session cipher errors
#[derive(Debug, Error)]
pub enum CipherError {
    /// Local or peer agreement key absent or unusable
    #[error("Key agreement failed: {0}")]
    KeyAgreement(String),

    /// Tag check failed: tampered input or the wrong key
    #[error("Authentication failed")]
    Authentication,

    #[error("Encryption failed: {0}")]
    Encryption(String),
}

impl CipherError {
    /// Text suitable for showing to the user in place of message content
    pub fn user_message(&self) -> &'static str {
        match self {
            CipherError::Authentication => "message could not be verified",
            CipherError::KeyAgreement(_) => "secure session could not be established",
            CipherError::Encryption(_) => "message could not be encrypted",
        }
    }
}

/// How the ECDH shared secret becomes the AES key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionKdf {
    /// The raw x-coordinate, as WebCrypto `deriveKey` does; interoperates
    /// with the browser client
    #[default]
    Raw,
    /// HKDF-SHA-256 over the shared secret with a fixed info label
    HkdfSha256,
}

impl fmt::Display for SessionKdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKdf::Raw => f.write_str("raw"),
            SessionKdf::HkdfSha256 => f.write_str("hkdf-sha256"),
        }
    }
}

impl FromStr for SessionKdf {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "raw" => Ok(SessionKdf::Raw),
            "hkdf-sha256" | "hkdf" => Ok(SessionKdf::HkdfSha256),
            other => Err(format!("unknown session kdf: {}", other)),
        }
    }
}

/// 256-bit symmetric key shared with one peer
#[derive(Clone)]
pub struct SessionKey(Zeroizing<[u8; SESSION_KEY_LEN]>);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; SESSION_KEY_LEN]) -> Self {
        SessionKey(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_slice().ct_eq(other.0.as_slice()).into()
    }
}

impl Eq for SessionKey {}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

/// Ciphertext (with tag) and the nonce it was sealed under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
}

/// Derives session keys and seals/opens payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionCipher {
    kdf: SessionKdf,
}

impl SessionCipher {
    pub fn new(kdf: SessionKdf) -> Self {
        Self { kdf }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.kdf)
    }

    pub fn kdf(&self) -> SessionKdf {
        self.kdf
    }

    /// Derive the key shared between `local` and the holder of `peer_public`
    ///
    /// `peer_public` is the peer's uncompressed SEC1 agreement key.
    pub fn derive_session_key(
        &self,
        local: &Keypair,
        peer_public: &[u8],
    ) -> Result<SessionKey, CipherError> {
        if local.role() != KeyRole::Agreement {
            return Err(CipherError::KeyAgreement(format!(
                "local {} key cannot be used for agreement",
                local.role()
            )));
        }

        let peer = parse_public_key(peer_public).map_err(|_| {
            CipherError::KeyAgreement("peer public key is not a P-256 point".to_string())
        })?;

        let shared = p256::ecdh::diffie_hellman(
            local.secret_key().to_nonzero_scalar(),
            peer.as_affine(),
        );

        let mut key = Zeroizing::new([0u8; SESSION_KEY_LEN]);
        match self.kdf {
            SessionKdf::Raw => key.copy_from_slice(shared.raw_secret_bytes().as_slice()),
            SessionKdf::HkdfSha256 => {
                Hkdf::<Sha256>::new(None, shared.raw_secret_bytes().as_slice())
                    .expand(HKDF_INFO, key.as_mut_slice())
                    .map_err(|e| CipherError::KeyAgreement(format!("HKDF expand failed: {}", e)))?;
            }
        }
        let key = SessionKey(key);

        metrics::record_counter(metrics::SESSION_KEYS_DERIVED, 1);
        debug!(kdf = %self.kdf, "derived session key");
        Ok(key)
    }

    /// Seal `plaintext` under `key` with a fresh random nonce
    pub fn encrypt(&self, plaintext: &[u8], key: &SessionKey) -> Result<SealedPayload, CipherError> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CipherError::Encryption(format!("Invalid key: {}", e)))?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|e| CipherError::Encryption(format!("Nonce generation failed: {}", e)))?;

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| CipherError::Encryption(e.to_string()))?;

        metrics::record_counter(metrics::MESSAGES_ENCRYPTED, 1);
        debug!(len = ciphertext.len(), "sealed payload");
        Ok(SealedPayload { ciphertext, nonce })
    }

    /// Open a payload sealed by [`SessionCipher::encrypt`]
    ///
    /// Nothing is returned unless the tag verifies.
    pub fn decrypt(&self, payload: &SealedPayload, key: &SessionKey) -> Result<Vec<u8>, CipherError> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CipherError::Encryption(format!("Invalid key: {}", e)))?;

        match cipher.decrypt(Nonce::from_slice(&payload.nonce), payload.ciphertext.as_slice()) {
            Ok(plaintext) => {
                metrics::record_counter(metrics::MESSAGES_DECRYPTED, 1);
                Ok(plaintext)
            }
            Err(_) => {
                metrics::record_counter(metrics::MESSAGES_AUTH_FAILED, 1);
                warn!(len = payload.ciphertext.len(), "payload failed authentication");
                Err(CipherError::Authentication)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_identity::{Identity, IdentityManager};
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn identity() -> Identity {
        IdentityManager::generate_with_rng(&mut OsRng).unwrap()
    }

    fn shared_key() -> SessionKey {
        let alice = identity();
        let bob = identity();
        SessionCipher::default()
            .derive_session_key(alice.agreement_keypair(), &bob.public_agreement_key())
            .unwrap()
    }

    #[test]
    fn test_alice_and_bob_derive_same_key() {
        let alice = identity();
        let bob = identity();

        for kdf in [SessionKdf::Raw, SessionKdf::HkdfSha256] {
            let cipher = SessionCipher::new(kdf);
            let k_ab = cipher
                .derive_session_key(alice.agreement_keypair(), &bob.public_agreement_key())
                .unwrap();
            let k_ba = cipher
                .derive_session_key(bob.agreement_keypair(), &alice.public_agreement_key())
                .unwrap();
            assert_eq!(k_ab, k_ba, "kdf {}", kdf);
        }
    }

    #[test]
    fn test_kdf_modes_differ() {
        let alice = identity();
        let bob = identity();

        let raw = SessionCipher::new(SessionKdf::Raw)
            .derive_session_key(alice.agreement_keypair(), &bob.public_agreement_key())
            .unwrap();
        let hkdf = SessionCipher::new(SessionKdf::HkdfSha256)
            .derive_session_key(alice.agreement_keypair(), &bob.public_agreement_key())
            .unwrap();
        assert_ne!(raw, hkdf);
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let alice = identity();
        let bob = identity();
        let cipher = SessionCipher::default();

        let first = cipher
            .derive_session_key(alice.agreement_keypair(), &bob.public_agreement_key())
            .unwrap();
        let second = cipher
            .derive_session_key(alice.agreement_keypair(), &bob.public_agreement_key())
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_hello_roundtrip() {
        let alice = identity();
        let bob = identity();
        let cipher = SessionCipher::default();

        let k_ab = cipher
            .derive_session_key(alice.agreement_keypair(), &bob.public_agreement_key())
            .unwrap();
        let k_ba = cipher
            .derive_session_key(bob.agreement_keypair(), &alice.public_agreement_key())
            .unwrap();

        let sealed = cipher.encrypt("hello".as_bytes(), &k_ab).unwrap();
        assert_eq!(sealed.ciphertext.len(), "hello".len() + 16);
        assert_eq!(cipher.decrypt(&sealed, &k_ba).unwrap(), b"hello");
    }

    #[test]
    fn test_third_party_cannot_decrypt() {
        let alice = identity();
        let bob = identity();
        let carol = identity();
        let cipher = SessionCipher::default();

        let k_ab = cipher
            .derive_session_key(alice.agreement_keypair(), &bob.public_agreement_key())
            .unwrap();
        let k_cb = cipher
            .derive_session_key(carol.agreement_keypair(), &bob.public_agreement_key())
            .unwrap();

        let sealed = cipher.encrypt(b"for bob only", &k_ab).unwrap();
        let err = cipher.decrypt(&sealed, &k_cb).unwrap_err();
        assert!(matches!(err, CipherError::Authentication));
        assert_eq!(err.user_message(), "message could not be verified");
    }

    #[test]
    fn test_any_bit_flip_is_detected() {
        let cipher = SessionCipher::default();
        let key = shared_key();
        let sealed = cipher.encrypt(b"hello", &key).unwrap();

        for i in 0..sealed.ciphertext.len() * 8 {
            let mut tampered = sealed.clone();
            tampered.ciphertext[i / 8] ^= 1 << (i % 8);
            assert!(matches!(
                cipher.decrypt(&tampered, &key),
                Err(CipherError::Authentication)
            ));
        }

        for i in 0..NONCE_LEN * 8 {
            let mut tampered = sealed.clone();
            tampered.nonce[i / 8] ^= 1 << (i % 8);
            assert!(matches!(
                cipher.decrypt(&tampered, &key),
                Err(CipherError::Authentication)
            ));
        }
    }

    #[test]
    fn test_truncated_ciphertext() {
        let cipher = SessionCipher::default();
        let key = shared_key();
        let mut sealed = cipher.encrypt(b"hello", &key).unwrap();
        sealed.ciphertext.truncate(3);

        assert!(matches!(
            cipher.decrypt(&sealed, &key),
            Err(CipherError::Authentication)
        ));
    }

    #[test]
    fn test_nonce_uniqueness() {
        let cipher = SessionCipher::default();
        let key = shared_key();

        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let sealed = cipher.encrypt(b"same plaintext", &key).unwrap();
            assert!(seen.insert(sealed.nonce), "nonce repeated");
        }
    }

    #[test]
    fn test_signing_key_cannot_agree() {
        let alice = identity();
        let bob = identity();

        let err = SessionCipher::default()
            .derive_session_key(alice.signing_keypair(), &bob.public_agreement_key())
            .unwrap_err();
        assert!(matches!(err, CipherError::KeyAgreement(_)));
    }

    #[test]
    fn test_invalid_peer_key() {
        let alice = identity();
        let cipher = SessionCipher::default();

        for peer in [vec![], vec![4u8; 65], vec![0u8; 33]] {
            assert!(matches!(
                cipher.derive_session_key(alice.agreement_keypair(), &peer),
                Err(CipherError::KeyAgreement(_))
            ));
        }
    }

    #[test]
    fn test_session_kdf_parse() {
        assert_eq!("raw".parse::<SessionKdf>().unwrap(), SessionKdf::Raw);
        assert_eq!("HKDF-SHA256".parse::<SessionKdf>().unwrap(), SessionKdf::HkdfSha256);
        assert!("pbkdf2".parse::<SessionKdf>().is_err());
        assert_eq!(
            serde_json::to_string(&SessionKdf::HkdfSha256).unwrap(),
            "\"hkdf-sha256\""
        );
    }

    #[test]
    fn test_session_key_debug_is_redacted() {
        let key = SessionKey::from_bytes([0xAB; SESSION_KEY_LEN]);
        assert!(!format!("{:?}", key).to_lowercase().contains("ab"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_any_text_roundtrips(text in ".*") {
            let cipher = SessionCipher::default();
            let key = SessionKey::from_bytes([7u8; SESSION_KEY_LEN]);

            let sealed = cipher.encrypt(text.as_bytes(), &key).unwrap();
            prop_assert_eq!(sealed.ciphertext.len(), text.len() + 16);
            prop_assert_eq!(cipher.decrypt(&sealed, &key).unwrap(), text.into_bytes());
        }
    }
}
