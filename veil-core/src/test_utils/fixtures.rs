//! Test fixtures for creating common test objects

use secrecy::SecretString;

use super::deterministic_rng::test_rng_with_seed;
use crate::config::VeilConfig;
use crate::context::VeilContext;
use crate::core_identity::{Identity, IdentityManager, Passphrase};

/// Defaults with the cheapest Argon2id cost, so keystore tests stay fast
pub fn fast_config() -> VeilConfig {
    let mut config = VeilConfig::default();
    config.keystore.memory_kib = 8;
    config.keystore.iterations = 1;
    config.keystore.parallelism = 1;
    config
}

pub fn passphrase() -> Passphrase {
    SecretString::new("correct horse battery staple".to_string())
}

/// Identity that is identical on every run for a given seed
pub fn seeded_identity(seed: u64) -> Identity {
    match IdentityManager::generate_with_rng(&mut test_rng_with_seed(seed)) {
        Ok(identity) => identity,
        Err(e) => panic!("seeded identity generation failed: {}", e),
    }
}

/// In-memory context that has completed entropy collection and generated
/// an identity under [`passphrase`]
pub async fn ready_context(config: VeilConfig) -> VeilContext {
    let ctx = VeilContext::in_memory(config);
    ctx.begin_generation().await;
    while !ctx.record_entropy(8).await.ready {}

    if let Err(e) = ctx.generate_identity(&passphrase()).await {
        panic!("fixture identity generation failed: {}", e);
    }
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_identity_is_reproducible() {
        let a = seeded_identity(7);
        let b = seeded_identity(7);
        let c = seeded_identity(8);

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.public_signing_key(), b.public_signing_key());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[tokio::test]
    async fn test_ready_context_has_identity() {
        let ctx = ready_context(fast_config()).await;
        assert!(ctx.identity().await.is_some());
    }
}
