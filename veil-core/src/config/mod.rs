//! Configuration for the Eternal Veil core
//!
//! Defaults match the behaviour of the original web client (0.5 entropy per
//! sample, 10 second burn timer, `eternal-veil-*` storage keys). Values can
//! be overridden from a TOML file or from `VEIL_<SECTION>_<KEY>` environment
//! variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::core_session::SessionKdf;

mod error;

pub use error::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VeilConfig {
    /// Entropy gate in front of identity generation
    pub entropy: EntropyConfig,

    /// Keystore persistence and passphrase hardening
    pub keystore: KeystoreConfig,

    /// Session key derivation
    pub session: SessionConfig,

    /// Burn-after-reading timers
    pub burn: BurnConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Entropy collector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntropyConfig {
    /// Level added per recorded sample
    pub step: f64,

    /// Level at which the pool reports ready
    pub target: f64,
}

/// Keystore settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreConfig {
    /// Directory backing the file key-value store
    pub data_dir: PathBuf,

    /// Storage key holding the active identity
    pub storage_key: String,

    /// Storage key holding the opaque settings blob
    pub settings_key: String,

    /// Argon2id memory cost in KiB
    pub memory_kib: u32,

    /// Argon2id iteration count
    pub iterations: u32,

    /// Argon2id lanes
    pub parallelism: u32,

    /// Accept keystores without a `protection` block (legacy web exports)
    pub allow_cleartext_import: bool,
}

/// Session cipher settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How the ECDH shared secret becomes the AES key
    pub kdf: SessionKdf,
}

/// Burn message settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BurnConfig {
    /// Timer used when the caller does not pick one
    #[serde(with = "humantime_serde")]
    pub default_timer: Duration,

    /// How often the scheduler sweeps for expired messages
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,

    /// Longest timer a sender may request, at most one year
    #[serde(with = "humantime_serde")]
    pub max_timer: Duration,

    /// How long a burned tombstone stays listed before it is forgotten
    #[serde(with = "humantime_serde")]
    pub tombstone_retention: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for EntropyConfig {
    fn default() -> Self {
        Self {
            step: 0.5,
            target: 100.0,
        }
    }
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./veil-data"),
            storage_key: "eternal-veil-keys".to_string(),
            settings_key: "eternal-veil-settings".to_string(),
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
            allow_cleartext_import: true,
        }
    }
}

impl Default for BurnConfig {
    fn default() -> Self {
        Self {
            default_timer: Duration::from_secs(10),
            tick_interval: Duration::from_secs(1),
            max_timer: Duration::from_secs(24 * 3600),
            tombstone_retention: crate::core_message::lifecycle::DEFAULT_TOMBSTONE_RETENTION,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

fn env_parse<T>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: name,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

fn env_duration(name: &'static str) -> Result<Option<Duration>, ConfigError> {
    match env::var(name) {
        Ok(raw) => humantime_serde::re::humantime::parse_duration(&raw)
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: name,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

impl VeilConfig {
    /// Load configuration from environment variables on top of the defaults
    ///
    /// Environment variables follow the pattern: VEIL_<SECTION>_<KEY>
    /// Example: VEIL_BURN_DEFAULT_TIMER=30s
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `VEIL_*` variables onto an existing configuration
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(step) = env_parse("VEIL_ENTROPY_STEP")? {
            self.entropy.step = step;
        }
        if let Some(target) = env_parse("VEIL_ENTROPY_TARGET")? {
            self.entropy.target = target;
        }

        if let Ok(dir) = env::var("VEIL_KEYSTORE_DATA_DIR") {
            self.keystore.data_dir = PathBuf::from(dir);
        }
        if let Some(memory) = env_parse("VEIL_KEYSTORE_MEMORY_KIB")? {
            self.keystore.memory_kib = memory;
        }
        if let Some(iterations) = env_parse("VEIL_KEYSTORE_ITERATIONS")? {
            self.keystore.iterations = iterations;
        }
        if let Some(allow) = env_parse("VEIL_KEYSTORE_ALLOW_CLEARTEXT_IMPORT")? {
            self.keystore.allow_cleartext_import = allow;
        }

        if let Some(kdf) = env_parse("VEIL_SESSION_KDF")? {
            self.session.kdf = kdf;
        }

        if let Some(timer) = env_duration("VEIL_BURN_DEFAULT_TIMER")? {
            self.burn.default_timer = timer;
        }
        if let Some(tick) = env_duration("VEIL_BURN_TICK_INTERVAL")? {
            self.burn.tick_interval = tick;
        }
        if let Some(max) = env_duration("VEIL_BURN_MAX_TIMER")? {
            self.burn.max_timer = max;
        }
        if let Some(retention) = env_duration("VEIL_BURN_TOMBSTONE_RETENTION")? {
            self.burn.tombstone_retention = retention;
        }

        if let Ok(level) = env::var("VEIL_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = env_parse("VEIL_LOG_JSON")? {
            self.logging.json_format = json;
        }

        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.entropy.step > 0.0) || !self.entropy.step.is_finite() {
            return Err(ConfigError::ValidationFailed(
                "entropy.step must be a positive number".to_string(),
            ));
        }
        if !(self.entropy.target >= self.entropy.step) || !self.entropy.target.is_finite() {
            return Err(ConfigError::ValidationFailed(
                "entropy.target must be at least one step".to_string(),
            ));
        }

        if self.keystore.storage_key.is_empty() || self.keystore.settings_key.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "keystore storage keys must not be empty".to_string(),
            ));
        }
        if self.keystore.storage_key == self.keystore.settings_key {
            return Err(ConfigError::ValidationFailed(
                "keystore.storage_key and keystore.settings_key must differ".to_string(),
            ));
        }
        // Argon2 requires at least 8 KiB per lane
        if self.keystore.parallelism == 0
            || self.keystore.iterations == 0
            || self.keystore.memory_kib < 8 * self.keystore.parallelism
        {
            return Err(ConfigError::ValidationFailed(
                "keystore argon2 parameters are out of range".to_string(),
            ));
        }

        if self.burn.tick_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "burn.tick_interval must be greater than 0".to_string(),
            ));
        }
        if self.burn.max_timer > crate::core_message::MAX_BURN_TIMER {
            return Err(ConfigError::ValidationFailed(
                "burn.max_timer must not exceed 365 days".to_string(),
            ));
        }
        if self.burn.default_timer.as_secs() == 0 || self.burn.default_timer > self.burn.max_timer
        {
            return Err(ConfigError::ValidationFailed(
                "burn.default_timer must be between 1s and burn.max_timer".to_string(),
            ));
        }

        if !crate::logging::LogLevel::is_valid(&self.logging.level) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;

        Ok(())
    }
}
