//! Metrics for identity, session and burn activity
//!
//! Uses the `metrics` facade only. Installing a recorder/exporter is the
//! host's job; without one every call here is a no-op.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Instant;

pub const IDENTITY_GENERATED: &str = "identity.generated";
pub const IDENTITY_IMPORTED: &str = "identity.imported";
pub const IDENTITY_GENERATION_MS: &str = "identity.generation.duration_ms";
pub const KEYSTORE_REJECTED: &str = "keystore.rejected";
pub const KEYSTORE_KDF_MS: &str = "keystore.kdf.duration_ms";
pub const SESSION_KEYS_DERIVED: &str = "session.keys.derived";
pub const MESSAGES_ENCRYPTED: &str = "messages.encrypted";
pub const MESSAGES_DECRYPTED: &str = "messages.decrypted";
pub const MESSAGES_AUTH_FAILED: &str = "messages.auth_failed";
pub const MESSAGES_BURNED: &str = "messages.burned";
pub const MESSAGES_BURNING: &str = "messages.burning";

/// Register descriptions for every metric this crate emits
pub fn init_metrics() {
    describe_counter!(IDENTITY_GENERATED, "Identities generated from a full entropy pool");
    describe_counter!(IDENTITY_IMPORTED, "Identities restored from a keystore");
    describe_histogram!(IDENTITY_GENERATION_MS, "Keypair generation duration in milliseconds");
    describe_counter!(KEYSTORE_REJECTED, "Keystore imports rejected by validation");
    describe_histogram!(KEYSTORE_KDF_MS, "Passphrase key derivation duration in milliseconds");
    describe_counter!(SESSION_KEYS_DERIVED, "Per-peer session keys derived via ECDH");
    describe_counter!(MESSAGES_ENCRYPTED, "Message payloads sealed");
    describe_counter!(MESSAGES_DECRYPTED, "Message payloads opened");
    describe_counter!(MESSAGES_AUTH_FAILED, "Message payloads that failed tag verification");
    describe_counter!(MESSAGES_BURNED, "Burn messages destroyed");
    describe_gauge!(MESSAGES_BURNING, "Burn messages with a running countdown");
}

/// Record a counter metric
pub fn record_counter(name: &'static str, value: u64) {
    counter!(name).increment(value);
}

/// Record a gauge metric
pub fn record_gauge(name: &'static str, value: f64) {
    gauge!(name).set(value);
}

/// Measures an operation and records it as a millisecond histogram on stop
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }

    /// Stop the timer and record the duration
    pub fn stop(self) {
        let duration = self.start.elapsed();
        histogram!(self.name).record(duration.as_secs_f64() * 1000.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_without_recorder_are_noops() {
        init_metrics();
        record_counter(MESSAGES_ENCRYPTED, 1);
        record_gauge(MESSAGES_BURNING, 3.0);
        Timer::new(IDENTITY_GENERATION_MS).stop();
    }
}
