//! Message module
//!
//! Per-message delivery state and burn-after-reading countdowns.
//!
//! Outgoing messages move `Composed -> Sent -> Delivered`, incoming ones
//! `Received -> Displayed`. Orthogonally a message with a burn timer moves
//! `NotBurning -> Countdown -> Burned`; `Burned` is terminal and the
//! plaintext is zeroized when it is entered.

use thiserror::Error;

use crate::types::MessageId;

pub mod burn_scheduler;
pub mod clock;
pub mod lifecycle;
pub mod message;

pub use burn_scheduler::{BurnEvent, BurnScheduler};
pub use clock::{Clock, ManualClock, SystemClock};
pub use lifecycle::{MessageLifecycleManager, SharedLifecycle, MAX_BURN_TIMER};
pub use message::{BurnPolicy, BurnState, DeliveryState, Direction, MessageSummary, WirePayload};

/// Message lifecycle errors
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Message not found: {0}")]
    NotFound(MessageId),

    #[error("Invalid transition for message {id}: {from} -> {to}")]
    InvalidTransition {
        id: MessageId,
        from: DeliveryState,
        to: DeliveryState,
    },

    /// Content was destroyed by its burn timer
    #[error("Message {0} has burned")]
    Burned(MessageId),

    #[error("Invalid burn timer: {0}")]
    InvalidTimer(String),
}
