//! Message records and their states

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::types::{ContactId, MessageId, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Delivery progress
///
/// Outgoing: `Composed -> Sent -> Delivered`. Incoming: `Received -> Displayed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Composed,
    Sent,
    Delivered,
    Received,
    Displayed,
}

impl DeliveryState {
    pub fn direction(self) -> Direction {
        match self {
            DeliveryState::Composed | DeliveryState::Sent | DeliveryState::Delivered => {
                Direction::Outgoing
            }
            DeliveryState::Received | DeliveryState::Displayed => Direction::Incoming,
        }
    }

    /// Single forward step only
    pub fn can_transition_to(self, next: DeliveryState) -> bool {
        matches!(
            (self, next),
            (DeliveryState::Composed, DeliveryState::Sent)
                | (DeliveryState::Sent, DeliveryState::Delivered)
                | (DeliveryState::Received, DeliveryState::Displayed)
        )
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliveryState::Composed => "composed",
            DeliveryState::Sent => "sent",
            DeliveryState::Delivered => "delivered",
            DeliveryState::Received => "received",
            DeliveryState::Displayed => "displayed",
        };
        f.write_str(s)
    }
}

/// Whether and when a message destroys itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BurnPolicy {
    None,
    #[serde(rename_all = "camelCase")]
    Timer { total_seconds: u64 },
}

impl BurnPolicy {
    pub fn from_seconds(seconds: Option<u64>) -> Self {
        match seconds {
            Some(total_seconds) => BurnPolicy::Timer { total_seconds },
            None => BurnPolicy::None,
        }
    }

    pub fn total(&self) -> Option<Duration> {
        match self {
            BurnPolicy::None => None,
            BurnPolicy::Timer { total_seconds } => Some(Duration::from_secs(*total_seconds)),
        }
    }
}

/// Burn sub-state, derived from the stored deadline on every query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BurnState {
    NotBurning,
    #[serde(rename_all = "camelCase")]
    Countdown { remaining_seconds: u64 },
    Burned,
}

/// What travels inside the ciphertext
///
/// The burn timer is sealed with the text so a relay cannot strip or
/// lengthen it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct WirePayload {
    pub text: String,
    #[serde(
        rename = "burnSeconds",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub burn_seconds: Option<u64>,
}

impl fmt::Debug for WirePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WirePayload")
            .field("text_len", &self.text.len())
            .field("burn_seconds", &self.burn_seconds)
            .finish()
    }
}

/// Content-free view of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSummary {
    pub id: MessageId,
    pub contact: ContactId,
    pub direction: Direction,
    pub delivery: DeliveryState,
    pub timestamp: Timestamp,
    pub burn_policy: BurnPolicy,
    pub burn_state: BurnState,
}

/// A tracked message
///
/// `content` is `None` once burned; the tombstone remains so late delivery
/// receipts and display surfaces can still refer to the id.
pub(crate) struct Message {
    pub(crate) id: MessageId,
    pub(crate) contact: ContactId,
    pub(crate) content: Option<Zeroizing<String>>,
    pub(crate) timestamp: Timestamp,
    pub(crate) burn_policy: BurnPolicy,
    pub(crate) delivery: DeliveryState,
    pub(crate) deadline: Option<Instant>,
    /// When the content was wiped; tombstones are pruned after a retention window
    pub(crate) burned_at: Option<Instant>,
    /// Insertion order, for stable listing of equal timestamps
    pub(crate) seq: u64,
}

impl Message {
    pub(crate) fn is_burned(&self) -> bool {
        self.content.is_none()
    }

    /// Start the countdown if this message has a timer and none is running
    ///
    /// A deadline past what `Instant` can represent burns at once.
    pub(crate) fn arm(&mut self, now: Instant) {
        if let (Some(total), None) = (self.burn_policy.total(), self.deadline) {
            self.deadline = Some(now.checked_add(total).unwrap_or(now));
        }
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Drop the plaintext; the `Zeroizing` wrapper wipes it
    pub(crate) fn burn(&mut self, now: Instant) {
        self.content = None;
        self.burned_at = Some(now);
    }

    /// Burned at least `retention` ago
    pub(crate) fn is_stale_tombstone(&self, now: Instant, retention: Duration) -> bool {
        self.burned_at
            .is_some_and(|at| now.saturating_duration_since(at) >= retention)
    }

    pub(crate) fn burn_state(&self, now: Instant) -> BurnState {
        if self.is_burned() {
            return BurnState::Burned;
        }
        match self.deadline {
            None => BurnState::NotBurning,
            Some(deadline) if now >= deadline => BurnState::Burned,
            Some(deadline) => {
                let left = deadline - now;
                // Whole seconds, rounded up: a 10 s timer reads 10 until one full second passes
                let remaining_seconds = left.as_secs() + u64::from(left.subsec_nanos() > 0);
                BurnState::Countdown { remaining_seconds }
            }
        }
    }

    pub(crate) fn summary(&self, now: Instant) -> MessageSummary {
        MessageSummary {
            id: self.id,
            contact: self.contact.clone(),
            direction: self.delivery.direction(),
            delivery: self.delivery,
            timestamp: self.timestamp,
            burn_policy: self.burn_policy,
            burn_state: self.burn_state(now),
        }
    }
}
