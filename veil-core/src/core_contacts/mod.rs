//! Contacts module
//!
//! Peers we can talk to, each pinned to an agreement public key. The
//! fingerprint is always computed locally from that key; `verified` flips only
//! after the user compares fingerprints out of band.

use thiserror::Error;

use crate::types::ContactId;

pub mod contact;
pub mod contact_book;

pub use contact::Contact;
pub use contact_book::ContactBook;

#[derive(Debug, Error)]
pub enum ContactError {
    #[error("Contact not found: {0}")]
    NotFound(ContactId),

    #[error("Contact already exists: {0}")]
    Duplicate(ContactId),

    #[error("Invalid contact key: {0}")]
    InvalidKey(String),

    /// Supplied or observed fingerprint disagrees with the contact's key
    #[error("Fingerprint does not match contact {0}")]
    FingerprintMismatch(ContactId),
}
