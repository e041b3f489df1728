//! Message lifecycle manager
//!
//! Owns every tracked message. Expired messages are burned on the first
//! access after their deadline, whether that access is a read, a state
//! query or a scheduler sweep, so a burned message is never readable even if
//! no sweep has run yet. Every burn is queued until the next [`sweep`],
//! which hands it to the scheduler exactly once no matter which path burned it.
//!
//! [`sweep`]: MessageLifecycleManager::sweep

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::clock::{Clock, SystemClock};
use super::message::{BurnPolicy, BurnState, DeliveryState, Message, MessageSummary};
use super::MessageError;
use crate::config::BurnConfig;
use crate::metrics;
use crate::types::{ContactId, MessageId, Timestamp};

/// Lifecycle manager shared between the context and the burn scheduler
pub type SharedLifecycle = Arc<RwLock<MessageLifecycleManager>>;

/// Upper bound for any burn timer, whatever the configuration says
pub const MAX_BURN_TIMER: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// How long a burned tombstone stays listed before it is forgotten
pub const DEFAULT_TOMBSTONE_RETENTION: Duration = Duration::from_secs(5 * 60);

pub struct MessageLifecycleManager {
    clock: Arc<dyn Clock>,
    max_timer: Duration,
    tombstone_retention: Duration,
    messages: HashMap<MessageId, Message>,
    /// Burns not yet reported by `sweep`
    pending_burns: Vec<(MessageId, ContactId)>,
    next_seq: u64,
}

impl MessageLifecycleManager {
    pub fn new(clock: Arc<dyn Clock>, max_timer: Duration) -> Self {
        Self {
            clock,
            max_timer: max_timer.min(MAX_BURN_TIMER),
            tombstone_retention: DEFAULT_TOMBSTONE_RETENTION,
            messages: HashMap::new(),
            pending_burns: Vec::new(),
            next_seq: 0,
        }
    }

    pub fn from_config(config: &BurnConfig) -> Self {
        Self::new(Arc::new(SystemClock), config.max_timer)
            .with_tombstone_retention(config.tombstone_retention)
    }

    pub fn with_tombstone_retention(mut self, retention: Duration) -> Self {
        self.tombstone_retention = retention;
        self
    }

    pub fn into_shared(self) -> SharedLifecycle {
        Arc::new(RwLock::new(self))
    }

    /// Track a message we are about to send
    ///
    /// A burn timer starts counting immediately on the sender's side.
    pub fn compose_outgoing(
        &mut self,
        contact: ContactId,
        content: String,
        burn_policy: BurnPolicy,
    ) -> Result<MessageId, MessageError> {
        self.check_outgoing_timer(burn_policy)?;

        let id = self.insert(contact, content, burn_policy, DeliveryState::Composed, Timestamp::now());
        let now = self.clock.now();
        if let Some(msg) = self.messages.get_mut(&id) {
            msg.arm(now);
        }
        self.report_burning();

        debug!(message_id = %id, burn = ?burn_policy, "composed outgoing message");
        Ok(id)
    }

    /// Track a message decrypted from a contact
    ///
    /// A burn timer does not start until the message is displayed. Timers
    /// from peers are clamped to `[1 s, max_timer]`.
    pub fn record_incoming(
        &mut self,
        contact: ContactId,
        content: String,
        burn_policy: BurnPolicy,
        timestamp: Timestamp,
    ) -> MessageId {
        let burn_policy = self.clamp_incoming_timer(burn_policy);
        let id = self.insert(contact, content, burn_policy, DeliveryState::Received, timestamp);
        debug!(message_id = %id, burn = ?burn_policy, "recorded incoming message");
        id
    }

    pub fn mark_sent(&mut self, id: MessageId) -> Result<(), MessageError> {
        self.advance(id, DeliveryState::Sent)
    }

    pub fn mark_delivered(&mut self, id: MessageId) -> Result<(), MessageError> {
        self.advance(id, DeliveryState::Delivered)
    }

    /// Incoming message shown to the user; starts its burn countdown
    pub fn mark_displayed(&mut self, id: MessageId) -> Result<(), MessageError> {
        self.advance(id, DeliveryState::Displayed)?;
        let now = self.clock.now();
        if let Some(msg) = self.messages.get_mut(&id) {
            msg.arm(now);
        }
        self.report_burning();
        Ok(())
    }

    /// Plaintext of a live message
    pub fn read(&mut self, id: MessageId) -> Result<Zeroizing<String>, MessageError> {
        self.burn_if_expired(id)?;
        let msg = self.messages.get(&id).ok_or(MessageError::NotFound(id))?;
        msg.content.clone().ok_or(MessageError::Burned(id))
    }

    pub fn burn_state(&mut self, id: MessageId) -> Result<BurnState, MessageError> {
        self.burn_if_expired(id)?;
        let now = self.clock.now();
        self.messages
            .get(&id)
            .map(|msg| msg.burn_state(now))
            .ok_or(MessageError::NotFound(id))
    }

    /// Time left before the message burns, `None` if no countdown is running
    pub fn remaining(&mut self, id: MessageId) -> Result<Option<Duration>, MessageError> {
        self.burn_if_expired(id)?;
        let now = self.clock.now();
        let msg = self.messages.get(&id).ok_or(MessageError::NotFound(id))?;
        if msg.is_burned() {
            return Ok(Some(Duration::ZERO));
        }
        Ok(msg.deadline.map(|deadline| deadline.saturating_duration_since(now)))
    }

    pub fn summary(&mut self, id: MessageId) -> Result<MessageSummary, MessageError> {
        self.burn_if_expired(id)?;
        let now = self.clock.now();
        self.messages
            .get(&id)
            .map(|msg| msg.summary(now))
            .ok_or(MessageError::NotFound(id))
    }

    /// Burn every message past its deadline and prune old tombstones
    ///
    /// Returns every burn since the previous sweep, including those that
    /// happened on a read or state query in between.
    pub fn sweep(&mut self) -> Vec<(MessageId, ContactId)> {
        self.burn_expired();
        self.prune_tombstones();
        std::mem::take(&mut self.pending_burns)
    }

    /// Conversation with `contact`, oldest first, burned tombstones included
    pub fn messages_for(&mut self, contact: &ContactId) -> Vec<MessageSummary> {
        self.burn_expired();
        let now = self.clock.now();

        let mut conversation: Vec<&Message> = self
            .messages
            .values()
            .filter(|msg| &msg.contact == contact)
            .collect();
        conversation.sort_by_key(|msg| (msg.timestamp, msg.seq));
        conversation.iter().map(|msg| msg.summary(now)).collect()
    }

    /// Forget a message entirely, wiping its content
    pub fn remove(&mut self, id: MessageId) -> Result<(), MessageError> {
        self.messages.remove(&id).ok_or(MessageError::NotFound(id))?;
        self.report_burning();
        Ok(())
    }

    /// Messages with a running countdown
    pub fn burning_count(&self) -> usize {
        self.messages
            .values()
            .filter(|msg| !msg.is_burned() && msg.deadline.is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop every message (logout)
    pub fn clear(&mut self) {
        self.messages.clear();
        self.pending_burns.clear();
        self.report_burning();
    }

    fn insert(
        &mut self,
        contact: ContactId,
        content: String,
        burn_policy: BurnPolicy,
        delivery: DeliveryState,
        timestamp: Timestamp,
    ) -> MessageId {
        let id = MessageId::generate();
        let seq = self.next_seq;
        self.next_seq += 1;

        self.messages.insert(
            id,
            Message {
                id,
                contact,
                content: Some(Zeroizing::new(content)),
                timestamp,
                burn_policy,
                delivery,
                deadline: None,
                burned_at: None,
                seq,
            },
        );
        id
    }

    fn advance(&mut self, id: MessageId, to: DeliveryState) -> Result<(), MessageError> {
        let msg = self.messages.get_mut(&id).ok_or(MessageError::NotFound(id))?;
        if !msg.delivery.can_transition_to(to) {
            return Err(MessageError::InvalidTransition {
                id,
                from: msg.delivery,
                to,
            });
        }
        msg.delivery = to;
        debug!(message_id = %id, state = %to, "message state changed");
        Ok(())
    }

    fn burn_if_expired(&mut self, id: MessageId) -> Result<(), MessageError> {
        let now = self.clock.now();
        let msg = self.messages.get_mut(&id).ok_or(MessageError::NotFound(id))?;
        if !msg.is_burned() && msg.is_expired(now) {
            msg.burn(now);
            self.pending_burns.push((id, msg.contact.clone()));
            metrics::record_counter(metrics::MESSAGES_BURNED, 1);
            self.report_burning();
            info!(message_id = %id, "message burned");
        }
        Ok(())
    }

    fn burn_expired(&mut self) {
        let now = self.clock.now();
        let before = self.pending_burns.len();

        for msg in self.messages.values_mut() {
            if !msg.is_burned() && msg.is_expired(now) {
                msg.burn(now);
                self.pending_burns.push((msg.id, msg.contact.clone()));
            }
        }

        let count = self.pending_burns.len() - before;
        if count > 0 {
            metrics::record_counter(metrics::MESSAGES_BURNED, count as u64);
            self.report_burning();
            info!(count, "burned expired messages");
        }
    }

    fn prune_tombstones(&mut self) {
        let now = self.clock.now();
        let retention = self.tombstone_retention;
        let before = self.messages.len();
        self.messages
            .retain(|_, msg| !msg.is_stale_tombstone(now, retention));

        let pruned = before - self.messages.len();
        if pruned > 0 {
            debug!(pruned, "forgot burned tombstones");
        }
    }

    fn check_outgoing_timer(&self, burn_policy: BurnPolicy) -> Result<(), MessageError> {
        match burn_policy.total() {
            Some(total) if total.is_zero() => Err(MessageError::InvalidTimer(
                "burn timer must be at least one second".to_string(),
            )),
            Some(total) if total > self.max_timer => Err(MessageError::InvalidTimer(format!(
                "burn timer exceeds maximum of {} s",
                self.max_timer.as_secs()
            ))),
            _ => Ok(()),
        }
    }

    fn clamp_incoming_timer(&self, burn_policy: BurnPolicy) -> BurnPolicy {
        match burn_policy {
            BurnPolicy::Timer { total_seconds } => {
                let clamped = total_seconds.clamp(1, self.max_timer.as_secs().max(1));
                if clamped != total_seconds {
                    warn!(requested = total_seconds, clamped, "clamped incoming burn timer");
                }
                BurnPolicy::Timer {
                    total_seconds: clamped,
                }
            }
            BurnPolicy::None => BurnPolicy::None,
        }
    }

    fn report_burning(&self) {
        metrics::record_gauge(metrics::MESSAGES_BURNING, self.burning_count() as f64);
    }
}

impl std::fmt::Debug for MessageLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageLifecycleManager")
            .field("messages", &self.messages.len())
            .field("max_timer", &self.max_timer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_message::clock::ManualClock;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn manager() -> (MessageLifecycleManager, ManualClock) {
        let clock = ManualClock::new();
        (MessageLifecycleManager::new(Arc::new(clock.clone()), DAY), clock)
    }

    fn ten_seconds() -> BurnPolicy {
        BurnPolicy::Timer { total_seconds: 10 }
    }

    #[test]
    fn test_outgoing_burns_after_ten_seconds() {
        let (mut mgr, clock) = manager();
        let id = mgr
            .compose_outgoing(ContactId::from("demo"), "secret".to_string(), ten_seconds())
            .unwrap();

        for elapsed in 0..10u64 {
            assert_eq!(
                mgr.burn_state(id).unwrap(),
                BurnState::Countdown {
                    remaining_seconds: 10 - elapsed
                }
            );
            assert_eq!(mgr.read(id).unwrap().as_str(), "secret");
            clock.advance(Duration::from_secs(1));
        }

        assert_eq!(mgr.burn_state(id).unwrap(), BurnState::Burned);
        assert!(matches!(mgr.read(id), Err(MessageError::Burned(_))));
        assert_eq!(mgr.remaining(id).unwrap(), Some(Duration::ZERO));
    }

    #[test]
    fn test_burned_is_terminal() {
        let (mut mgr, clock) = manager();
        let id = mgr
            .compose_outgoing(ContactId::from("demo"), "secret".to_string(), ten_seconds())
            .unwrap();
        clock.advance(Duration::from_secs(11));
        assert_eq!(mgr.sweep().len(), 1);

        // Delivery still progresses on the tombstone but content never returns
        mgr.mark_sent(id).unwrap();
        mgr.mark_delivered(id).unwrap();
        assert_eq!(mgr.burn_state(id).unwrap(), BurnState::Burned);
        assert!(matches!(mgr.read(id), Err(MessageError::Burned(_))));
        assert!(mgr.sweep().is_empty());
    }

    #[test]
    fn test_burn_on_read_is_reported_by_next_sweep() {
        let (mut mgr, clock) = manager();
        let contact = ContactId::from("demo");
        let id = mgr
            .compose_outgoing(contact.clone(), "secret".to_string(), ten_seconds())
            .unwrap();

        clock.advance(Duration::from_secs(10));
        assert!(matches!(mgr.read(id), Err(MessageError::Burned(_))));

        assert_eq!(mgr.sweep(), vec![(id, contact)]);
        assert!(mgr.sweep().is_empty());
    }

    #[test]
    fn test_listing_does_not_swallow_burns() {
        let (mut mgr, clock) = manager();
        let contact = ContactId::from("demo");
        let id = mgr
            .compose_outgoing(contact.clone(), "secret".to_string(), ten_seconds())
            .unwrap();

        clock.advance(Duration::from_secs(10));
        assert_eq!(mgr.messages_for(&contact)[0].burn_state, BurnState::Burned);
        assert_eq!(mgr.sweep(), vec![(id, contact)]);
    }

    #[test]
    fn test_tombstones_are_pruned_after_retention() {
        let (mgr, clock) = manager();
        let mut mgr = mgr.with_tombstone_retention(Duration::from_secs(60));
        let id = mgr
            .compose_outgoing(ContactId::from("demo"), "x".to_string(), ten_seconds())
            .unwrap();

        clock.advance(Duration::from_secs(10));
        assert_eq!(mgr.sweep().len(), 1);
        assert_eq!(mgr.len(), 1);

        clock.advance(Duration::from_secs(59));
        mgr.sweep();
        assert_eq!(mgr.burn_state(id).unwrap(), BurnState::Burned);

        clock.advance(Duration::from_secs(1));
        assert!(mgr.sweep().is_empty());
        assert!(mgr.is_empty());
        assert!(matches!(mgr.burn_state(id), Err(MessageError::NotFound(_))));
    }

    #[test]
    fn test_max_timer_is_capped() {
        let clock = ManualClock::new();
        let mut mgr = MessageLifecycleManager::new(Arc::new(clock), Duration::MAX);
        let id = mgr.record_incoming(
            ContactId::from("demo"),
            "x".to_string(),
            BurnPolicy::Timer {
                total_seconds: u64::MAX,
            },
            Timestamp::now(),
        );

        assert_eq!(
            mgr.summary(id).unwrap().burn_policy.total(),
            Some(MAX_BURN_TIMER)
        );
        mgr.mark_displayed(id).unwrap();
        assert!(matches!(
            mgr.burn_state(id).unwrap(),
            BurnState::Countdown { .. }
        ));
    }

    #[test]
    fn test_no_policy_never_burns() {
        let (mut mgr, clock) = manager();
        let id = mgr
            .compose_outgoing(ContactId::from("demo"), "keep".to_string(), BurnPolicy::None)
            .unwrap();

        clock.advance(DAY * 30);
        assert!(mgr.sweep().is_empty());
        assert_eq!(mgr.burn_state(id).unwrap(), BurnState::NotBurning);
        assert_eq!(mgr.remaining(id).unwrap(), None);
        assert_eq!(mgr.read(id).unwrap().as_str(), "keep");
    }

    #[test]
    fn test_deadline_is_independent_of_polling() {
        let (mut mgr, clock) = manager();
        let id = mgr
            .compose_outgoing(ContactId::from("demo"), "x".to_string(), ten_seconds())
            .unwrap();

        // No queries for 7 s, then one query
        clock.advance(Duration::from_secs(7));
        assert_eq!(
            mgr.burn_state(id).unwrap(),
            BurnState::Countdown { remaining_seconds: 3 }
        );
        assert_eq!(mgr.remaining(id).unwrap(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_incoming_countdown_starts_on_display() {
        let (mut mgr, clock) = manager();
        let id = mgr.record_incoming(
            ContactId::from("demo"),
            "read me".to_string(),
            ten_seconds(),
            Timestamp::now(),
        );

        clock.advance(Duration::from_secs(60));
        assert_eq!(mgr.burn_state(id).unwrap(), BurnState::NotBurning);
        assert_eq!(mgr.burning_count(), 0);

        mgr.mark_displayed(id).unwrap();
        assert_eq!(mgr.burning_count(), 1);
        clock.advance(Duration::from_secs(9));
        assert_eq!(mgr.read(id).unwrap().as_str(), "read me");

        clock.advance(Duration::from_secs(1));
        assert!(matches!(mgr.read(id), Err(MessageError::Burned(_))));
        assert_eq!(mgr.burning_count(), 0);
    }

    #[test]
    fn test_invalid_transitions() {
        let (mut mgr, _clock) = manager();
        let out = mgr
            .compose_outgoing(ContactId::from("demo"), "x".to_string(), BurnPolicy::None)
            .unwrap();
        let inc = mgr.record_incoming(
            ContactId::from("demo"),
            "y".to_string(),
            BurnPolicy::None,
            Timestamp::now(),
        );

        assert!(matches!(
            mgr.mark_delivered(out),
            Err(MessageError::InvalidTransition { .. })
        ));
        assert!(matches!(
            mgr.mark_displayed(out),
            Err(MessageError::InvalidTransition { .. })
        ));
        assert!(matches!(
            mgr.mark_sent(inc),
            Err(MessageError::InvalidTransition { .. })
        ));

        mgr.mark_displayed(inc).unwrap();
        assert!(matches!(
            mgr.mark_displayed(inc),
            Err(MessageError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_unknown_message() {
        let (mut mgr, _clock) = manager();
        let id = MessageId::generate();
        assert!(matches!(mgr.read(id), Err(MessageError::NotFound(_))));
        assert!(matches!(mgr.mark_sent(id), Err(MessageError::NotFound(_))));
        assert!(matches!(mgr.remove(id), Err(MessageError::NotFound(_))));
    }

    #[test]
    fn test_outgoing_timer_bounds() {
        let (mut mgr, _clock) = manager();
        let contact = ContactId::from("demo");

        assert!(matches!(
            mgr.compose_outgoing(
                contact.clone(),
                "x".to_string(),
                BurnPolicy::Timer { total_seconds: 0 }
            ),
            Err(MessageError::InvalidTimer(_))
        ));
        assert!(matches!(
            mgr.compose_outgoing(
                contact,
                "x".to_string(),
                BurnPolicy::Timer {
                    total_seconds: DAY.as_secs() + 1
                }
            ),
            Err(MessageError::InvalidTimer(_))
        ));
        assert!(mgr.is_empty());
    }

    #[test]
    fn test_incoming_timer_is_clamped() {
        let (mut mgr, _clock) = manager();
        let contact = ContactId::from("demo");

        let huge = mgr.record_incoming(
            contact.clone(),
            "x".to_string(),
            BurnPolicy::Timer {
                total_seconds: u64::MAX,
            },
            Timestamp::now(),
        );
        let zero = mgr.record_incoming(
            contact,
            "y".to_string(),
            BurnPolicy::Timer { total_seconds: 0 },
            Timestamp::now(),
        );

        assert_eq!(
            mgr.summary(huge).unwrap().burn_policy,
            BurnPolicy::Timer {
                total_seconds: DAY.as_secs()
            }
        );
        assert_eq!(
            mgr.summary(zero).unwrap().burn_policy,
            BurnPolicy::Timer { total_seconds: 1 }
        );
    }

    #[test]
    fn test_independent_countdowns() {
        let (mut mgr, clock) = manager();
        let contact = ContactId::from("demo");
        let short = mgr
            .compose_outgoing(
                contact.clone(),
                "short".to_string(),
                BurnPolicy::Timer { total_seconds: 2 },
            )
            .unwrap();
        let long = mgr
            .compose_outgoing(contact, "long".to_string(), ten_seconds())
            .unwrap();

        clock.advance(Duration::from_secs(2));
        let burned = mgr.sweep();
        assert_eq!(burned.len(), 1);
        assert_eq!(burned[0].0, short);
        assert_eq!(mgr.read(long).unwrap().as_str(), "long");
    }

    #[test]
    fn test_messages_for_keeps_order_and_tombstones() {
        let (mut mgr, clock) = manager();
        let demo = ContactId::from("demo");
        let other = ContactId::from("other");

        let first = mgr
            .compose_outgoing(demo.clone(), "1".to_string(), BurnPolicy::Timer { total_seconds: 1 })
            .unwrap();
        let second = mgr
            .compose_outgoing(demo.clone(), "2".to_string(), BurnPolicy::None)
            .unwrap();
        mgr.compose_outgoing(other, "3".to_string(), BurnPolicy::None)
            .unwrap();

        clock.advance(Duration::from_secs(1));
        let conversation = mgr.messages_for(&demo);
        assert_eq!(
            conversation.iter().map(|m| m.id).collect::<Vec<_>>(),
            vec![first, second]
        );
        assert_eq!(conversation[0].burn_state, BurnState::Burned);
        assert_eq!(conversation[1].burn_state, BurnState::NotBurning);
    }

    #[test]
    fn test_clear_and_remove() {
        let (mut mgr, _clock) = manager();
        let id = mgr
            .compose_outgoing(ContactId::from("demo"), "x".to_string(), ten_seconds())
            .unwrap();
        mgr.compose_outgoing(ContactId::from("demo"), "y".to_string(), BurnPolicy::None)
            .unwrap();

        mgr.remove(id).unwrap();
        assert_eq!(mgr.len(), 1);
        assert_eq!(mgr.burning_count(), 0);

        mgr.clear();
        assert!(mgr.is_empty());
    }
}
