//! Transport collaborator
//!
//! The core hands out opaque envelopes and accepts them back; it never
//! assumes delivery. Hosts implement [`Transport`] over whatever carries
//! bytes. [`LoopbackTransport`] connects two in-process endpoints for tests
//! and demos.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use super::cipher::SealedPayload;
use crate::types::{ContactId, MessageId};

/// Ciphertext leaving this identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    #[serde(rename = "messageId")]
    pub message_id: MessageId,
    #[serde(rename = "recipientContactId")]
    pub recipient: ContactId,
    #[serde(flatten)]
    pub payload: SealedPayload,
}

/// Ciphertext arriving from a contact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    #[serde(rename = "senderContactId")]
    pub sender: ContactId,
    #[serde(flatten)]
    pub payload: SealedPayload,
}

/// Transport errors, distinct from cipher failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,

    #[error("Send failed: {0}")]
    Send(String),
}

/// Something that can carry an envelope toward its recipient
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hand off `envelope`; success means accepted, not delivered
    async fn send(&self, envelope: OutboundEnvelope) -> Result<(), TransportError>;
}

/// One end of an in-process transport pair
pub struct LoopbackTransport {
    /// How the peer's contact book names us
    local_as_seen_by_peer: ContactId,
    outgoing: mpsc::UnboundedSender<InboundEnvelope>,
    incoming: Mutex<mpsc::UnboundedReceiver<InboundEnvelope>>,
}

impl LoopbackTransport {
    /// Connect two endpoints
    ///
    /// `a_at_b` is the contact id under which B knows A, and vice versa.
    pub fn pair(a_at_b: ContactId, b_at_a: ContactId) -> (Self, Self) {
        let (to_b, from_a) = mpsc::unbounded_channel();
        let (to_a, from_b) = mpsc::unbounded_channel();

        let a = LoopbackTransport {
            local_as_seen_by_peer: a_at_b,
            outgoing: to_b,
            incoming: Mutex::new(from_b),
        };
        let b = LoopbackTransport {
            local_as_seen_by_peer: b_at_a,
            outgoing: to_a,
            incoming: Mutex::new(from_a),
        };
        (a, b)
    }

    /// Wait for the next envelope from the peer; `None` once the peer is gone
    pub async fn recv(&self) -> Option<InboundEnvelope> {
        self.incoming.lock().await.recv().await
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, envelope: OutboundEnvelope) -> Result<(), TransportError> {
        debug!(
            message_id = %envelope.message_id,
            len = envelope.payload.ciphertext.len(),
            "loopback send"
        );
        self.outgoing
            .send(InboundEnvelope {
                sender: self.local_as_seen_by_peer.clone(),
                payload: envelope.payload,
            })
            .map_err(|_| TransportError::Closed)
    }
}
