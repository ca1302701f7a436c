//! Configuration types for the lease sync system
//!
//! This module defines all configuration structures used throughout the crate.
//! A [`SyncConfig`] is built once at startup, validated, and then owned by
//! the engine for the lifetime of the process.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::binding::REVERSE_ZONE_SUFFIX;
use crate::transaction::DEFAULT_TTL;

/// Default location of the OPNsense configuration
pub const DEFAULT_OPNSENSE_CONFIG_PATH: &str = "/conf/config.xml";

/// Default TSIG algorithm
pub const DEFAULT_ALGORITHM: &str = "hmac-sha512";

/// Default TSIG key name
pub const DEFAULT_KEY_NAME: &str = "rndc-key";

/// Default update program
pub const DEFAULT_NSUPDATE_PROGRAM: &str = "nsupdate";

/// Lower bound of the poll period
pub const MIN_POLL_INTERVAL_SECS: u64 = 5;

/// TSIG algorithms nsupdate accepts
pub const SUPPORTED_ALGORITHMS: &[&str] = &[
    "hmac-md5",
    "hmac-sha1",
    "hmac-sha224",
    "hmac-sha256",
    "hmac-sha384",
    "hmac-sha512",
];

/// Main lease sync configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Where bindings are read from
    #[serde(default)]
    pub source: SourceConfig,

    /// Lease cache backend
    #[serde(default)]
    pub cache: CacheConfig,

    /// DNS update application settings
    pub applier: ApplierConfig,

    /// Generated record settings
    #[serde(default)]
    pub update: UpdateConfig,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl SyncConfig {
    /// Create a configuration with defaults and the given TSIG secret
    pub fn new(key_secret: impl Into<String>) -> Self {
        Self {
            applier: ApplierConfig::new(key_secret),
            ..Self::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.source.validate()?;
        self.cache.validate()?;
        self.applier.validate()?;
        self.update.validate()?;
        self.engine.validate()?;
        Ok(())
    }
}

/// Binding source configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// OPNsense `config.xml`
    Opnsense {
        /// Path to the configuration file
        path: PathBuf,
    },
}

impl SourceConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            SourceConfig::Opnsense { path } => {
                if path.as_os_str().is_empty() {
                    return Err(crate::Error::config("OPNsense config path cannot be empty"));
                }
                Ok(())
            }
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Opnsense {
            path: PathBuf::from(DEFAULT_OPNSENSE_CONFIG_PATH),
        }
    }
}

/// Lease cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheConfig {
    /// SQLite database
    Sqlite {
        /// Path to the database file
        path: PathBuf,
    },

    /// JSON file
    File {
        /// Path to the cache file
        path: PathBuf,
    },

    /// In-memory cache (not persistent)
    Memory,
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            CacheConfig::Sqlite { path } | CacheConfig::File { path } => {
                if path.as_os_str().is_empty() {
                    return Err(crate::Error::config("Cache path cannot be empty"));
                }
                Ok(())
            }
            CacheConfig::Memory => Ok(()),
        }
    }

    /// Backend name as accepted on the command line
    pub fn backend_name(&self) -> &'static str {
        match self {
            CacheConfig::Sqlite { .. } => "sqlite",
            CacheConfig::File { .. } => "file",
            CacheConfig::Memory => "memory",
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig::Sqlite {
            path: PathBuf::from(crate::cache::DEFAULT_SQLITE_CACHE_PATH),
        }
    }
}

/// Update applier configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct ApplierConfig {
    /// TSIG algorithm
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// TSIG key name
    #[serde(default = "default_key_name")]
    pub key_name: String,

    /// TSIG key secret (base64)
    pub key_secret: String,

    /// DNS server to send updates to; local mode when unset
    #[serde(default)]
    pub server: Option<String>,

    /// Update program to run
    #[serde(default = "default_program")]
    pub program: PathBuf,

    /// Render updates without sending them
    #[serde(default)]
    pub dry_run: bool,
}

impl ApplierConfig {
    pub fn new(key_secret: impl Into<String>) -> Self {
        Self {
            algorithm: default_algorithm(),
            key_name: default_key_name(),
            key_secret: key_secret.into(),
            server: None,
            program: default_program(),
            dry_run: false,
        }
    }

    pub fn validate(&self) -> Result<(), crate::Error> {
        if !SUPPORTED_ALGORITHMS.contains(&self.algorithm.as_str()) {
            return Err(crate::Error::config(format!(
                "Unsupported TSIG algorithm '{}' (expected one of: {})",
                self.algorithm,
                SUPPORTED_ALGORITHMS.join(", ")
            )));
        }
        if self.key_name.trim().is_empty() {
            return Err(crate::Error::config("TSIG key name cannot be empty"));
        }
        if self.key_secret.trim().is_empty() {
            return Err(crate::Error::config("TSIG key secret cannot be empty"));
        }
        if let Some(server) = &self.server
            && server.trim().is_empty()
        {
            return Err(crate::Error::config("DNS server cannot be empty when set"));
        }
        if self.program.as_os_str().is_empty() {
            return Err(crate::Error::config("Update program cannot be empty"));
        }
        Ok(())
    }
}

impl fmt::Debug for ApplierConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplierConfig")
            .field("algorithm", &self.algorithm)
            .field("key_name", &self.key_name)
            .field("key_secret", &"<redacted>")
            .field("server", &self.server)
            .field("program", &self.program)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl Default for ApplierConfig {
    fn default() -> Self {
        Self::new(String::new())
    }
}

fn default_algorithm() -> String {
    DEFAULT_ALGORITHM.to_string()
}

fn default_key_name() -> String {
    DEFAULT_KEY_NAME.to_string()
}

fn default_program() -> PathBuf {
    PathBuf::from(DEFAULT_NSUPDATE_PROGRAM)
}

/// Generated record settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// TTL of every added record
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Reverse zone suffix PTR names are built under
    #[serde(default = "default_reverse_suffix")]
    pub reverse_suffix: String,
}

impl UpdateConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.ttl == 0 {
            return Err(crate::Error::config("TTL must be > 0"));
        }
        if self.reverse_suffix.trim_matches('.').is_empty() {
            return Err(crate::Error::config("Reverse zone suffix cannot be empty"));
        }
        Ok(())
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            ttl: default_ttl(),
            reverse_suffix: default_reverse_suffix(),
        }
    }
}

fn default_ttl() -> u32 {
    DEFAULT_TTL
}

fn default_reverse_suffix() -> String {
    REVERSE_ZONE_SUFFIX.to_string()
}

/// How the engine schedules cycles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// A single cycle, then exit
    #[default]
    OneShot,
    /// Cycle until shut down
    Continuous,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub mode: RunMode,

    /// Seconds between revision samples in continuous mode
    ///
    /// Values below [`MIN_POLL_INTERVAL_SECS`] are raised to it.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Re-push every binding, unchanged ones included, on every cycle
    #[serde(default)]
    pub force: bool,

    /// Upper bound on one apply call (in seconds)
    #[serde(default = "default_apply_timeout_secs")]
    pub apply_timeout_secs: u64,

    /// Capacity of the engine event channel
    ///
    /// When full, new events are dropped (with a warning log).
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.apply_timeout_secs == 0 {
            return Err(crate::Error::config("Apply timeout must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }

    /// Poll period with the lower bound applied
    pub fn effective_poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(MIN_POLL_INTERVAL_SECS))
    }

    pub fn apply_timeout(&self) -> Duration {
        Duration::from_secs(self.apply_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            poll_interval_secs: default_poll_interval_secs(),
            force: false,
            apply_timeout_secs: default_apply_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_apply_timeout_secs() -> u64 {
    120
}

fn default_event_channel_capacity() -> usize {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::new("c2VjcmV0");
        assert!(config.validate().is_ok());
        assert_eq!(config.applier.algorithm, "hmac-sha512");
        assert_eq!(config.applier.key_name, "rndc-key");
        assert_eq!(config.update.ttl, 3600);
        assert_eq!(config.engine.mode, RunMode::OneShot);
        assert_eq!(config.cache.backend_name(), "sqlite");
        assert_eq!(config.engine.effective_poll_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_poll_interval_floor() {
        let engine = EngineConfig {
            poll_interval_secs: 1,
            ..EngineConfig::default()
        };
        assert_eq!(engine.effective_poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_poll_interval_is_floored() {
        let engine = EngineConfig {
            poll_interval_secs: 0,
            ..EngineConfig::default()
        };
        assert!(engine.validate().is_ok());
        assert_eq!(engine.effective_poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_validation_failures() {
        assert!(SyncConfig::new("").validate().is_err());

        let mut config = SyncConfig::new("c2VjcmV0");
        config.applier.algorithm = "hmac-sha3".to_string();
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));

        let mut config = SyncConfig::new("c2VjcmV0");
        config.update.ttl = 0;
        assert!(config.validate().is_err());

        let mut config = SyncConfig::new("c2VjcmV0");
        config.applier.server = Some(" ".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = ApplierConfig::new("dG9wLXNlY3JldA==");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("dG9wLXNlY3JldA=="));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{
            "cache": { "type": "file", "path": "/var/db/leases.json" },
            "applier": { "key_secret": "c2VjcmV0", "server": "127.0.0.1" },
            "engine": { "mode": "continuous", "poll_interval_secs": 30 }
        }"#;
        let config: SyncConfig = serde_json::from_str(json).unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(
            config.cache,
            CacheConfig::File {
                path: PathBuf::from("/var/db/leases.json")
            }
        );
        assert_eq!(config.applier.key_name, DEFAULT_KEY_NAME);
        assert_eq!(config.engine.mode, RunMode::Continuous);
        assert_eq!(config.engine.apply_timeout_secs, 120);
        assert!(matches!(config.source, SourceConfig::Opnsense { .. }));
    }
}
