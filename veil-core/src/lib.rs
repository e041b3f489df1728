pub mod config;
pub mod context;
pub mod core_contacts;
pub mod core_identity;
pub mod core_message;
pub mod core_session;
pub mod logging;
pub mod metrics;
pub mod types;

#[cfg(test)]
pub mod test_utils;

pub use config::VeilConfig;
pub use context::{ContextError, EntropyProgress, ExportedKeystore, VeilContext};
pub use core_identity::{Fingerprint, Identity, IdentityManager, KeystoreCodec, Passphrase};
pub use core_session::{InboundEnvelope, OutboundEnvelope, SessionCipher};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogLevel};
