//! Test utilities shared across veil-core unit tests
//!
//! Fixtures for configs, identities and ready-to-use contexts, plus a
//! seeded RNG for reproducible key material.

pub mod deterministic_rng;
pub mod fixtures;

pub use deterministic_rng::*;
pub use fixtures::*;
