use serde::{Deserialize, Serialize};

use super::ContactError;
use crate::core_identity::fingerprint::Fingerprint;
use crate::core_identity::keypair::{encode_public_key, parse_public_key};
use crate::types::ContactId;

/// A peer and the keys we hold for them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: ContactId,
    pub display_name: String,
    /// Computed from `public_agreement_key`, never taken from the peer
    pub fingerprint: Fingerprint,
    pub verified: bool,
    pub online: bool,
    pub public_agreement_key: Vec<u8>,
}

impl Contact {
    /// Build a contact from its agreement key
    ///
    /// The key is re-encoded canonically so fingerprints match the peer's
    /// own computation even if we were handed a compressed point.
    pub fn new(
        id: ContactId,
        display_name: impl Into<String>,
        public_agreement_key: &[u8],
    ) -> Result<Self, ContactError> {
        let public = parse_public_key(public_agreement_key)
            .map_err(|_| ContactError::InvalidKey("agreement key is not a P-256 point".to_string()))?;

        Ok(Contact {
            id,
            display_name: display_name.into(),
            fingerprint: Fingerprint::of(&public),
            verified: false,
            online: false,
            public_agreement_key: encode_public_key(&public),
        })
    }

    /// Build a contact and check the fingerprint the peer advertised
    pub fn with_claimed_fingerprint(
        id: ContactId,
        display_name: impl Into<String>,
        public_agreement_key: &[u8],
        claimed: &Fingerprint,
    ) -> Result<Self, ContactError> {
        let contact = Self::new(id, display_name, public_agreement_key)?;
        if &contact.fingerprint != claimed {
            return Err(ContactError::FingerprintMismatch(contact.id));
        }
        Ok(contact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_identity::IdentityManager;
    use aes_gcm::aead::OsRng;
    use p256::elliptic_curve::sec1::ToEncodedPoint;

    #[test]
    fn test_fingerprint_is_computed_locally() {
        let peer = IdentityManager::generate_with_rng(&mut OsRng).unwrap();
        let contact =
            Contact::new(ContactId::from("bob"), "Bob", &peer.public_agreement_key()).unwrap();

        assert_eq!(&contact.fingerprint, peer.fingerprint());
        assert!(!contact.verified);
        assert!(!contact.online);
    }

    #[test]
    fn test_compressed_key_is_canonicalised() {
        let peer = IdentityManager::generate_with_rng(&mut OsRng).unwrap();
        let compressed = peer
            .agreement_keypair()
            .public_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec();

        let contact = Contact::new(ContactId::from("bob"), "Bob", &compressed).unwrap();
        assert_eq!(contact.public_agreement_key, peer.public_agreement_key());
        assert_eq!(&contact.fingerprint, peer.fingerprint());
    }

    #[test]
    fn test_claimed_fingerprint_must_match() {
        let peer = IdentityManager::generate_with_rng(&mut OsRng).unwrap();
        let imposter = IdentityManager::generate_with_rng(&mut OsRng).unwrap();

        assert!(Contact::with_claimed_fingerprint(
            ContactId::from("bob"),
            "Bob",
            &peer.public_agreement_key(),
            peer.fingerprint(),
        )
        .is_ok());

        assert!(matches!(
            Contact::with_claimed_fingerprint(
                ContactId::from("bob"),
                "Bob",
                &peer.public_agreement_key(),
                imposter.fingerprint(),
            ),
            Err(ContactError::FingerprintMismatch(_))
        ));
    }

    #[test]
    fn test_invalid_keys() {
        assert!(matches!(
            Contact::new(ContactId::from("x"), "X", &[1, 2, 3]),
            Err(ContactError::InvalidKey(_))
        ));

        assert!(matches!(
            Contact::new(ContactId::from("x"), "X", &[0u8; 65]),
            Err(ContactError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_contact_json_fields() {
        let peer = IdentityManager::generate_with_rng(&mut OsRng).unwrap();
        let contact =
            Contact::new(ContactId::from("bob"), "Bob", &peer.public_agreement_key()).unwrap();

        let value = serde_json::to_value(&contact).unwrap();
        let mut fields: Vec<&str> = value
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        fields.sort_unstable();
        assert_eq!(
            fields,
            vec![
                "displayName",
                "fingerprint",
                "id",
                "online",
                "publicAgreementKey",
                "verified"
            ]
        );

        // Records written with a signing key still load
        let mut legacy = value.clone();
        legacy["publicSigningKey"] = serde_json::json!([4, 1, 2]);
        let restored: Contact = serde_json::from_value(legacy).unwrap();
        assert_eq!(restored, contact);
    }
}
