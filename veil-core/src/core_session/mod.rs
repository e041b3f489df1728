//! Session module
//!
//! Per-peer symmetric keys and the envelopes that carry ciphertext to a
//! transport collaborator. Delivery itself is outside the core; see
//! [`transport::Transport`].

pub mod cipher;
pub mod transport;

pub use cipher::{CipherError, SealedPayload, SessionCipher, SessionKdf, SessionKey, NONCE_LEN};
pub use transport::{InboundEnvelope, LoopbackTransport, OutboundEnvelope, Transport, TransportError};
