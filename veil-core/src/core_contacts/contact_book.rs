use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::{Contact, ContactError};
use crate::core_identity::fingerprint::Fingerprint;
use crate::types::ContactId;

/// Contacts keyed by id
#[derive(Debug, Default, Clone)]
pub struct ContactBook {
    contacts: HashMap<ContactId, Contact>,
}

impl ContactBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, contact: Contact) -> Result<(), ContactError> {
        if self.contacts.contains_key(&contact.id) {
            return Err(ContactError::Duplicate(contact.id));
        }
        info!(contact_id = %contact.id, fingerprint = %contact.fingerprint.hex, "added contact");
        self.contacts.insert(contact.id.clone(), contact);
        Ok(())
    }

    pub fn get(&self, id: &ContactId) -> Result<&Contact, ContactError> {
        self.contacts
            .get(id)
            .ok_or_else(|| ContactError::NotFound(id.clone()))
    }

    /// Apply `f` to the contact with `id`
    ///
    /// Key and fingerprint are restored afterwards; changing keys means
    /// removing the contact and adding a new one.
    pub fn update<F>(&mut self, id: &ContactId, f: F) -> Result<(), ContactError>
    where
        F: FnOnce(&mut Contact),
    {
        let contact = self
            .contacts
            .get_mut(id)
            .ok_or_else(|| ContactError::NotFound(id.clone()))?;

        let id_before = contact.id.clone();
        let fingerprint = contact.fingerprint.clone();
        let agreement_key = contact.public_agreement_key.clone();

        f(contact);

        contact.id = id_before;
        contact.fingerprint = fingerprint;
        contact.public_agreement_key = agreement_key;
        Ok(())
    }

    pub fn set_online(&mut self, id: &ContactId, online: bool) -> Result<(), ContactError> {
        self.update(id, |c| c.online = online)
    }

    /// Mark verified after the user compared fingerprints out of band
    ///
    /// `observed` is what the user saw on the peer's device.
    pub fn mark_verified(&mut self, id: &ContactId, observed: &Fingerprint) -> Result<(), ContactError> {
        let contact = self
            .contacts
            .get_mut(id)
            .ok_or_else(|| ContactError::NotFound(id.clone()))?;

        if &contact.fingerprint != observed {
            warn!(contact_id = %id, "fingerprint comparison failed");
            return Err(ContactError::FingerprintMismatch(id.clone()));
        }

        contact.verified = true;
        info!(contact_id = %id, "contact verified");
        Ok(())
    }

    pub fn remove(&mut self, id: &ContactId) -> Result<Contact, ContactError> {
        let removed = self
            .contacts
            .remove(id)
            .ok_or_else(|| ContactError::NotFound(id.clone()))?;
        debug!(contact_id = %id, "removed contact");
        Ok(removed)
    }

    /// All contacts, sorted by display name then id
    pub fn list(&self) -> Vec<&Contact> {
        let mut contacts: Vec<&Contact> = self.contacts.values().collect();
        contacts.sort_by(|a, b| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        });
        contacts
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn clear(&mut self) {
        self.contacts.clear();
    }
}
