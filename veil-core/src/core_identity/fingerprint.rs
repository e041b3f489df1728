//! Fingerprints for out-of-band identity verification
//!
//! SHA-256 over the uncompressed SEC1 public agreement key; the first eight
//! digest bytes are rendered two ways:
//!
//! - `hex`: `A1B2:C3D4:E5F6:7890` (uppercase, four groups of four)
//! - `emoji`: eight symbols, `byte % 16` into [`EMOJI_ALPHABET`]

use p256::PublicKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use super::keypair::encode_public_key;

/// Digest bytes rendered into a fingerprint
pub const FINGERPRINT_BYTES: usize = 8;

/// Symbols used by the emoji rendering, indexed by `byte % 16`
pub const EMOJI_ALPHABET: [&str; 16] = [
    "🔐", "🌟", "⚡", "🦋", "🌙", "🔥", "💎", "🎭", "🚀", "🌈", "🎪", "🎯", "🎲", "🎸", "🎺", "🎻",
];

/// Human-verifiable rendering of a public agreement key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub emoji: String,
    pub hex: String,
}

impl Fingerprint {
    /// Fingerprint of a parsed public key
    pub fn of(public_key: &PublicKey) -> Self {
        Self::from_public_key_bytes(&encode_public_key(public_key))
    }

    /// Fingerprint of an already-encoded public key
    ///
    /// Callers must pass the canonical uncompressed encoding; the same point
    /// in compressed form yields a different fingerprint.
    pub fn from_public_key_bytes(encoded: &[u8]) -> Self {
        let digest = Sha256::digest(encoded);
        let prefix = &digest[..FINGERPRINT_BYTES];

        let emoji = prefix
            .iter()
            .map(|byte| EMOJI_ALPHABET[usize::from(byte % 16)])
            .collect::<String>();

        let hex = hex::encode_upper(prefix)
            .as_bytes()
            .chunks(4)
            .map(|group| String::from_utf8_lossy(group).into_owned())
            .collect::<Vec<_>>()
            .join(":");

        Fingerprint { emoji, hex }
    }

    /// Structural check: `XXXX:XXXX:XXXX:XXXX` uppercase hex and eight
    /// symbols from the alphabet
    pub fn is_well_formed(&self) -> bool {
        let groups: Vec<&str> = self.hex.split(':').collect();
        let hex_ok = groups.len() == FINGERPRINT_BYTES / 2
            && groups.iter().all(|g| {
                g.len() == 4 && g.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
            });

        hex_ok && emoji_symbols(&self.emoji).is_some_and(|n| n == FINGERPRINT_BYTES)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.hex, self.emoji)
    }
}

/// Count alphabet symbols in `s`, or `None` if anything else is present
fn emoji_symbols(s: &str) -> Option<usize> {
    let mut rest = s;
    let mut count = 0;
    while !rest.is_empty() {
        let symbol = EMOJI_ALPHABET.iter().find(|sym| rest.starts_with(**sym))?;
        rest = &rest[symbol.len()..];
        count += 1;
    }
    Some(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_identity::keypair::{KeyRole, Keypair};
    use aes_gcm::aead::OsRng;
    use proptest::prelude::*;

    fn fixed_key(byte: u8) -> PublicKey {
        p256::SecretKey::from_slice(&[byte; 32]).unwrap().public_key()
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let key = fixed_key(7);
        assert_eq!(Fingerprint::of(&key), Fingerprint::of(&key));
    }

    #[test]
    fn test_fingerprint_matches_manual_digest() {
        let key = fixed_key(1);
        let encoded = encode_public_key(&key);
        let digest = Sha256::digest(&encoded);

        let fp = Fingerprint::of(&key);
        let expected_hex = format!(
            "{:02X}{:02X}:{:02X}{:02X}:{:02X}{:02X}:{:02X}{:02X}",
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7]
        );
        assert_eq!(fp.hex, expected_hex);

        let first = EMOJI_ALPHABET[usize::from(digest[0] % 16)];
        assert!(fp.emoji.starts_with(first));
    }

    #[test]
    fn test_distinct_keys_distinct_fingerprints() {
        let a = Keypair::generate(KeyRole::Agreement, &mut OsRng).unwrap();
        let b = Keypair::generate(KeyRole::Agreement, &mut OsRng).unwrap();
        assert_ne!(Fingerprint::of(a.public_key()), Fingerprint::of(b.public_key()));
    }

    #[test]
    fn test_malformed_fingerprints_rejected() {
        let good = Fingerprint::of(&fixed_key(3));
        assert!(good.is_well_formed());

        let mut lower = good.clone();
        lower.hex = "a1b2:c3d4:e5f6:7890".to_string();
        assert!(!lower.is_well_formed());

        let mut short = good.clone();
        short.hex = "A1B2:C3D4".to_string();
        assert!(!short.is_well_formed());

        let mut foreign = good;
        foreign.emoji = "abcdefgh".to_string();
        assert!(!foreign.is_well_formed());
    }

    proptest! {
        #[test]
        fn prop_fingerprint_format(seed in prop::array::uniform32(1u8..=0x7f)) {
            let key = p256::SecretKey::from_slice(&seed).unwrap().public_key();
            let fp = Fingerprint::of(&key);

            prop_assert!(fp.is_well_formed());
            prop_assert_eq!(fp.hex.len(), 19);
            prop_assert_eq!(fp.emoji.chars().count(), FINGERPRINT_BYTES);
        }
    }
}
