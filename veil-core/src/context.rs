//! Owned application state
//!
//! [`VeilContext`] replaces the web client's global app object. It holds the
//! single active identity, the contact book, the message lifecycle manager,
//! the per-contact session-key cache and the key-value store, and exposes the
//! operations the presentation layer drives.
//!
//! The identity slot is replaced whole: generation and import build a new
//! [`Identity`] off to the side and only swap it in once everything that can
//! fail has succeeded. A failed import never disturbs the current identity.

use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::VeilConfig;
use crate::core_contacts::{Contact, ContactBook, ContactError};
use crate::core_identity::{
    keystore_filename, EntropyCollector, EntropyTicket, Fingerprint, FileStore, Identity,
    IdentityError, IdentityManager, KeyValueStore, KeystoreCodec, KeystoreError, MemoryStore,
    Passphrase, SampleOutcome,
};
use crate::core_message::{
    BurnPolicy, BurnScheduler, Clock, MessageError, MessageLifecycleManager, MessageSummary,
    SharedLifecycle, SystemClock, WirePayload,
};
use crate::core_session::{
    CipherError, InboundEnvelope, OutboundEnvelope, SessionCipher, SessionKey, Transport,
    TransportError,
};
use crate::types::{ContactId, MessageId, Timestamp};

/// Context errors
#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Keystore(#[from] KeystoreError),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Contact(#[from] ContactError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("No identity loaded")]
    NoIdentity,

    #[error("Entropy pool not ready")]
    EntropyNotReady,

    /// Ciphertext authenticated but did not contain a message payload
    #[error("Malformed message payload")]
    MalformedPayload,

    #[error("Background task failed: {0}")]
    Task(String),
}

impl ContextError {
    /// Text suitable for the user, without internal detail
    pub fn user_message(&self) -> String {
        match self {
            ContextError::Cipher(e) => e.user_message().to_string(),
            ContextError::MalformedPayload => "message could not be verified".to_string(),
            other => other.to_string(),
        }
    }
}

/// Entropy flow progress after one sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntropyProgress {
    pub level: f64,
    pub percent: f64,
    pub ready: bool,
}

/// A keystore ready to be written out
#[derive(Debug, Clone)]
pub struct ExportedKeystore {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct EntropyState {
    collector: EntropyCollector,
    ticket: Option<EntropyTicket>,
}

pub struct VeilContext {
    config: VeilConfig,
    entropy: Mutex<EntropyState>,
    identity: RwLock<Option<Arc<Identity>>>,
    contacts: RwLock<ContactBook>,
    lifecycle: SharedLifecycle,
    session_keys: RwLock<HashMap<ContactId, SessionKey>>,
    store: Arc<dyn KeyValueStore>,
    codec: KeystoreCodec,
    cipher: SessionCipher,
}

impl VeilContext {
    pub fn new(config: VeilConfig, store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Build with an explicit clock for burn deadlines
    pub fn with_clock(config: VeilConfig, store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        let entropy = EntropyState {
            collector: EntropyCollector::from_config(&config.entropy),
            ticket: None,
        };

        Self {
            entropy: Mutex::new(entropy),
            identity: RwLock::new(None),
            contacts: RwLock::new(ContactBook::new()),
            lifecycle: MessageLifecycleManager::new(clock, config.burn.max_timer)
                .with_tombstone_retention(config.burn.tombstone_retention)
                .into_shared(),
            session_keys: RwLock::new(HashMap::new()),
            store,
            codec: KeystoreCodec::from_config(&config.keystore),
            cipher: SessionCipher::from_config(&config.session),
            config,
        }
    }

    /// Context backed by a non-persistent store
    pub fn in_memory(config: VeilConfig) -> Self {
        Self::new(config, Arc::new(MemoryStore::new()))
    }

    /// Context backed by files under `config.keystore.data_dir`
    pub fn open(config: VeilConfig) -> Result<Self, ContextError> {
        let store = FileStore::new(config.keystore.data_dir.clone())?;
        Ok(Self::new(config, Arc::new(store)))
    }

    pub fn config(&self) -> &VeilConfig {
        &self.config
    }

    /// Shared handle for a [`BurnScheduler`] or a display surface
    pub fn lifecycle(&self) -> SharedLifecycle {
        self.lifecycle.clone()
    }

    /// Start sweeping burn deadlines at the configured tick
    pub fn spawn_burn_scheduler(&self) -> BurnScheduler {
        BurnScheduler::spawn(self.lifecycle.clone(), self.config.burn.tick_interval)
    }

    // --- Identity ---

    pub async fn identity(&self) -> Option<Arc<Identity>> {
        self.identity.read().await.clone()
    }

    pub async fn fingerprint(&self) -> Option<Fingerprint> {
        self.identity
            .read()
            .await
            .as_ref()
            .map(|identity| identity.fingerprint().clone())
    }

    /// Start a new entropy collection cycle
    pub async fn begin_generation(&self) {
        let mut entropy = self.entropy.lock().await;
        entropy.collector.reset();
        entropy.ticket = None;
        debug!("entropy collection started");
    }

    /// Feed one input event into the entropy pool
    pub async fn record_entropy(&self, source_entropy_bits: u32) -> EntropyProgress {
        let mut entropy = self.entropy.lock().await;
        if let SampleOutcome::Ready(ticket) = entropy.collector.record_sample(source_entropy_bits) {
            entropy.ticket = Some(ticket);
        }

        EntropyProgress {
            level: entropy.collector.level(),
            percent: entropy.collector.progress_percent(),
            ready: entropy.collector.is_ready(),
        }
    }

    /// Generate, persist and activate a fresh identity
    ///
    /// Requires a completed entropy cycle. Any failure resets the entropy
    /// flow so the user starts sample collection again.
    pub async fn generate_identity(&self, passphrase: &Passphrase) -> Result<Arc<Identity>, ContextError> {
        let ticket = self
            .entropy
            .lock()
            .await
            .ticket
            .take()
            .ok_or(ContextError::EntropyNotReady)?;
        debug!(samples = ticket.samples(), "entropy ticket consumed");

        let result = async {
            let identity = Arc::new(IdentityManager::generate().await?);
            self.persist(identity.clone(), passphrase).await?;
            Ok::<_, ContextError>(identity)
        }
        .await;

        match result {
            Ok(identity) => {
                self.install(identity.clone()).await;
                Ok(identity)
            }
            Err(e) => {
                warn!(error = %e, "identity generation failed; entropy reset");
                self.begin_generation().await;
                Err(e)
            }
        }
    }

    /// Import a keystore file and make it the active identity
    pub async fn import_keystore(
        &self,
        serialized: Vec<u8>,
        passphrase: &Passphrase,
    ) -> Result<Arc<Identity>, ContextError> {
        let codec = self.codec.clone();
        let pass = duplicate(passphrase);
        let identity = blocking(move || Ok(codec.decode(&serialized, Some(&pass))?)).await?;

        let identity = Arc::new(identity);
        self.persist(identity.clone(), passphrase).await?;
        self.install(identity.clone()).await;
        Ok(identity)
    }

    /// Serialize the active identity under `passphrase`
    pub async fn export_keystore(&self, passphrase: &Passphrase) -> Result<ExportedKeystore, ContextError> {
        let identity = self.identity().await.ok_or(ContextError::NoIdentity)?;
        let filename = keystore_filename(identity.created());

        let codec = self.codec.clone();
        let pass = duplicate(passphrase);
        let bytes = blocking(move || Ok(codec.encode_to_vec(&identity, Some(&pass))?)).await?;

        info!(filename = %filename, "exported keystore");
        Ok(ExportedKeystore { filename, bytes })
    }

    /// Restore the identity saved in the key-value store, if any
    pub async fn load_identity(&self, passphrase: &Passphrase) -> Result<Option<Arc<Identity>>, ContextError> {
        let Some(serialized) = self.store.get(&self.config.keystore.storage_key)? else {
            debug!("no stored identity");
            return Ok(None);
        };

        let codec = self.codec.clone();
        let pass = duplicate(passphrase);
        let identity = blocking(move || Ok(codec.decode(&serialized, Some(&pass))?)).await?;

        let identity = Arc::new(identity);
        self.install(identity.clone()).await;
        Ok(Some(identity))
    }

    /// Destroy the active identity and everything derived from it
    pub async fn logout(&self) -> Result<(), ContextError> {
        self.store.remove(&self.config.keystore.storage_key)?;
        *self.identity.write().await = None;
        self.session_keys.write().await.clear();
        self.contacts.write().await.clear();
        self.lifecycle.write().await.clear();
        self.begin_generation().await;
        info!("logged out");
        Ok(())
    }

    async fn persist(&self, identity: Arc<Identity>, passphrase: &Passphrase) -> Result<(), ContextError> {
        let codec = self.codec.clone();
        let pass = duplicate(passphrase);
        let bytes = blocking(move || Ok(codec.encode_to_vec(&identity, Some(&pass))?)).await?;
        self.store.set(&self.config.keystore.storage_key, &bytes)?;
        Ok(())
    }

    async fn install(&self, identity: Arc<Identity>) {
        let mut slot = self.identity.write().await;
        // Session keys belong to the previous agreement key
        self.session_keys.write().await.clear();
        info!(fingerprint = %identity.fingerprint().hex, "identity active");
        *slot = Some(identity);
    }

    // --- Settings ---

    /// Opaque settings blob; `{}` when absent or unreadable
    pub fn load_settings(&self) -> serde_json::Value {
        let empty = || serde_json::Value::Object(Default::default());
        match self.store.get(&self.config.keystore.settings_key) {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(error = %e, "settings unreadable; using defaults");
                empty()
            }),
            Ok(None) => empty(),
            Err(e) => {
                warn!(error = %e, "settings unavailable; using defaults");
                empty()
            }
        }
    }

    pub fn save_settings(&self, settings: &serde_json::Value) -> Result<(), ContextError> {
        let bytes = serde_json::to_vec(settings)
            .map_err(|e| KeystoreError::Serialization(e.to_string()))?;
        self.store.set(&self.config.keystore.settings_key, &bytes)?;
        Ok(())
    }

    // --- Contacts ---

    /// Add a contact, checking `claimed` against the key if the peer sent one
    pub async fn add_contact(
        &self,
        id: ContactId,
        display_name: impl Into<String>,
        public_agreement_key: &[u8],
        claimed: Option<&Fingerprint>,
    ) -> Result<Contact, ContextError> {
        let contact = match claimed {
            Some(fingerprint) => {
                Contact::with_claimed_fingerprint(id, display_name, public_agreement_key, fingerprint)?
            }
            None => Contact::new(id, display_name, public_agreement_key)?,
        };

        self.contacts.write().await.insert(contact.clone())?;
        Ok(contact)
    }

    pub async fn contact(&self, id: &ContactId) -> Result<Contact, ContextError> {
        Ok(self.contacts.read().await.get(id)?.clone())
    }

    pub async fn contacts(&self) -> Vec<Contact> {
        self.contacts.read().await.list().into_iter().cloned().collect()
    }

    pub async fn verify_contact(&self, id: &ContactId, observed: &Fingerprint) -> Result<(), ContextError> {
        Ok(self.contacts.write().await.mark_verified(id, observed)?)
    }

    pub async fn set_contact_online(&self, id: &ContactId, online: bool) -> Result<(), ContextError> {
        Ok(self.contacts.write().await.set_online(id, online)?)
    }

    pub async fn remove_contact(&self, id: &ContactId) -> Result<(), ContextError> {
        let mut contacts = self.contacts.write().await;
        contacts.remove(id)?;
        self.session_keys.write().await.remove(id);
        Ok(())
    }

    // --- Messages ---

    /// Encrypt `text` for `contact` and track it as outgoing
    pub async fn send_message(&self, contact: &ContactId, text: &str) -> Result<OutboundEnvelope, ContextError> {
        self.send_with_policy(contact, text, BurnPolicy::None).await
    }

    /// Like [`send_message`](Self::send_message) with a burn timer; `None`
    /// uses the configured default
    ///
    /// Timers travel as whole seconds, so a fractional timer is rejected.
    pub async fn send_burn_message(
        &self,
        contact: &ContactId,
        text: &str,
        timer: Option<Duration>,
    ) -> Result<OutboundEnvelope, ContextError> {
        let timer = timer.unwrap_or(self.config.burn.default_timer);
        if timer.subsec_nanos() != 0 {
            return Err(MessageError::InvalidTimer(format!(
                "burn timer must be whole seconds, got {:?}",
                timer
            ))
            .into());
        }
        let policy = BurnPolicy::Timer {
            total_seconds: timer.as_secs(),
        };
        self.send_with_policy(contact, text, policy).await
    }

    /// Hand an envelope to `transport` and mark it sent
    pub async fn dispatch(
        &self,
        transport: &dyn Transport,
        envelope: OutboundEnvelope,
    ) -> Result<(), ContextError> {
        let id = envelope.message_id;
        transport.send(envelope).await?;
        self.lifecycle.write().await.mark_sent(id)?;
        Ok(())
    }

    /// Decrypt an envelope from a contact and track it as incoming
    ///
    /// Nothing is recorded unless the ciphertext authenticates.
    pub async fn receive_message(&self, envelope: InboundEnvelope) -> Result<MessageId, ContextError> {
        let key = self.session_key(&envelope.sender).await?;
        let plaintext = Zeroizing::new(self.cipher.decrypt(&envelope.payload, &key)?);

        let payload: WirePayload =
            serde_json::from_slice(&plaintext).map_err(|_| ContextError::MalformedPayload)?;

        let id = self.lifecycle.write().await.record_incoming(
            envelope.sender.clone(),
            payload.text.clone(),
            BurnPolicy::from_seconds(payload.burn_seconds),
            Timestamp::now(),
        );
        debug!(message_id = %id, contact_id = %envelope.sender, "received message");
        Ok(id)
    }

    pub async fn mark_delivered(&self, id: MessageId) -> Result<(), ContextError> {
        Ok(self.lifecycle.write().await.mark_delivered(id)?)
    }

    pub async fn mark_displayed(&self, id: MessageId) -> Result<(), ContextError> {
        Ok(self.lifecycle.write().await.mark_displayed(id)?)
    }

    /// Plaintext of a message that has not burned
    pub async fn read_message(&self, id: MessageId) -> Result<Zeroizing<String>, ContextError> {
        Ok(self.lifecycle.write().await.read(id)?)
    }

    pub async fn message(&self, id: MessageId) -> Result<MessageSummary, ContextError> {
        Ok(self.lifecycle.write().await.summary(id)?)
    }

    pub async fn conversation(&self, contact: &ContactId) -> Vec<MessageSummary> {
        self.lifecycle.write().await.messages_for(contact)
    }

    async fn send_with_policy(
        &self,
        contact: &ContactId,
        text: &str,
        policy: BurnPolicy,
    ) -> Result<OutboundEnvelope, ContextError> {
        let key = self.session_key(contact).await?;

        let payload = WirePayload {
            text: text.to_string(),
            burn_seconds: match policy {
                BurnPolicy::Timer { total_seconds } => Some(total_seconds),
                BurnPolicy::None => None,
            },
        };
        let plaintext = Zeroizing::new(
            serde_json::to_vec(&payload).map_err(|e| CipherError::Encryption(e.to_string()))?,
        );

        let id = self
            .lifecycle
            .write()
            .await
            .compose_outgoing(contact.clone(), text.to_string(), policy)?;

        match self.cipher.encrypt(&plaintext, &key) {
            Ok(sealed) => Ok(OutboundEnvelope {
                message_id: id,
                recipient: contact.clone(),
                payload: sealed,
            }),
            Err(e) => {
                // Composition is undone so a failed send leaves no trace
                let _ = self.lifecycle.write().await.remove(id);
                Err(e.into())
            }
        }
    }

    /// Cached session key for `contact`, derived on first use
    async fn session_key(&self, contact: &ContactId) -> Result<SessionKey, ContextError> {
        if let Some(key) = self.session_keys.read().await.get(contact) {
            return Ok(key.clone());
        }

        let identity = self.identity().await.ok_or(ContextError::NoIdentity)?;
        let peer_key = self.contacts.read().await.get(contact)?.public_agreement_key.clone();
        let key = self
            .cipher
            .derive_session_key(identity.agreement_keypair(), &peer_key)?;

        self.cache_session_key(&identity, contact, &peer_key, &key).await;
        Ok(key)
    }

    /// Cache `key` unless the identity or the contact's key changed while it
    /// was being derived
    ///
    /// Lock order is identity, contacts, session keys; the guards are held
    /// until the insert so a concurrent logout, import or contact removal
    /// either runs first and is seen here, or runs after and clears the entry.
    async fn cache_session_key(
        &self,
        derived_with: &Arc<Identity>,
        contact: &ContactId,
        peer_key: &[u8],
        key: &SessionKey,
    ) -> bool {
        let identity = self.identity.read().await;
        let contacts = self.contacts.read().await;

        let identity_current = identity
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, derived_with));
        let contact_current = contacts
            .get(contact)
            .is_ok_and(|c| c.public_agreement_key.as_slice() == peer_key);

        if !(identity_current && contact_current) {
            debug!(contact_id = %contact, "session key not cached; state changed");
            return false;
        }
        self.session_keys
            .write()
            .await
            .insert(contact.clone(), key.clone());
        true
    }
}

impl std::fmt::Debug for VeilContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VeilContext")
            .field("codec", &self.codec)
            .field("cipher", &self.cipher)
            .finish_non_exhaustive()
    }
}

/// Copy a passphrase for a blocking task
fn duplicate(passphrase: &Passphrase) -> Passphrase {
    SecretString::new(passphrase.expose_secret().clone())
}

/// Run CPU-heavy work (Argon2id) on the blocking pool
async fn blocking<T, F>(f: F) -> Result<T, ContextError>
where
    F: FnOnce() -> Result<T, ContextError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ContextError::Task(e.to_string()))?
}
