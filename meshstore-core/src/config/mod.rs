//! Configuration management for MeshStore
//!
//! Defaults, environment overrides (`MESHSTORE_<SECTION>_<KEY>`), TOML files
//! and validation.

use crate::core_store::store::DurableStoreOptions;
use crate::core_sync::transport::TransportMode;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main database configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store configuration
    pub store: StoreConfig,

    /// Sync / transport configuration
    pub sync: SyncConfig,

    /// Change event configuration
    pub events: EventsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Data directory for persistent storage
    pub data_dir: PathBuf,

    /// Logged operations between snapshots
    pub snapshot_interval: usize,

    /// Snapshots kept after compaction
    pub keep_snapshots: usize,

    /// Fixed replica / peer id; generated and persisted in `data_dir` when unset
    pub replica_id: Option<String>,
}

/// Sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Transport backend
    pub mode: TransportMode,

    /// `host:port` of the relay service (Relay mode)
    pub relay_address: Option<String>,

    /// Timeout for enabling sync and for individual dials/handshakes
    pub timeout_ms: u64,

    /// Upgrade every connection with a Noise handshake
    pub encryption_enabled: bool,

    /// Listener address for the Direct backend
    pub listen_address: SocketAddr,

    /// Entry points into the Direct backend's DHT
    pub bootstrap_peers: Vec<SocketAddr>,

    /// How often the Direct backend refreshes its peer table
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
}

/// Change event configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Per-subscriber queue bound
    pub channel_capacity: usize,
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

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            snapshot_interval: 1000,
            keep_snapshots: 2,
            replica_id: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Direct,
            relay_address: None,
            timeout_ms: 10_000,
            encryption_enabled: true,
            listen_address: SocketAddr::from(([0, 0, 0, 0], 0)),
            bootstrap_peers: vec![],
            refresh_interval: Duration::from_secs(2),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { channel_capacity: 1024 }
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

impl StoreConfig {
    pub fn durable_options(&self) -> DurableStoreOptions {
        DurableStoreOptions {
            snapshot_interval: self.snapshot_interval,
            keep_snapshots: self.keep_snapshots,
        }
    }
}

impl SyncConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn parse_var<T>(name: &str, value: &str, what: &'static str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::BadVariable { var: name.to_string(), what, reason: e.to_string() })
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: MESHSTORE_<SECTION>_<KEY>
    /// Example: MESHSTORE_SYNC_MODE=relay
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable lookup
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Store config
        if let Some(data_dir) = var("MESHSTORE_STORE_DATA_DIR") {
            config.store.data_dir = PathBuf::from(data_dir);
        }
        if let Some(id) = var("MESHSTORE_STORE_REPLICA_ID") {
            config.store.replica_id = Some(id);
        }

        // Sync config
        if let Some(mode) = var("MESHSTORE_SYNC_MODE") {
            config.sync.mode = parse_var("MESHSTORE_SYNC_MODE", &mode, "transport mode")?;
        }
        if let Some(addr) = var("MESHSTORE_SYNC_RELAY_ADDRESS") {
            config.sync.relay_address = Some(addr).filter(|a| !a.trim().is_empty());
        }
        if let Some(timeout) = var("MESHSTORE_SYNC_TIMEOUT_MS") {
            config.sync.timeout_ms = parse_var("MESHSTORE_SYNC_TIMEOUT_MS", &timeout, "timeout")?;
        }
        if let Some(flag) = var("MESHSTORE_SYNC_ENCRYPTION_ENABLED") {
            config.sync.encryption_enabled =
                parse_var("MESHSTORE_SYNC_ENCRYPTION_ENABLED", &flag, "encryption flag")?;
        }
        if let Some(addr) = var("MESHSTORE_SYNC_LISTEN_ADDRESS") {
            config.sync.listen_address =
                parse_var("MESHSTORE_SYNC_LISTEN_ADDRESS", &addr, "listen address")?;
        }
        if let Some(peers) = var("MESHSTORE_SYNC_BOOTSTRAP_PEERS") {
            config.sync.bootstrap_peers = peers
                .split(',')
                .filter(|p| !p.trim().is_empty())
                .map(|p| parse_var("MESHSTORE_SYNC_BOOTSTRAP_PEERS", p, "bootstrap peer"))
                .collect::<Result<_, _>>()?;
        }

        // Events config
        if let Some(capacity) = var("MESHSTORE_EVENTS_CHANNEL_CAPACITY") {
            config.events.channel_capacity =
                parse_var("MESHSTORE_EVENTS_CHANNEL_CAPACITY", &capacity, "channel capacity")?;
        }

        // Logging config
        if let Some(level) = var("MESHSTORE_LOG_LEVEL") {
            config.logging.level = level.to_lowercase();
        }
        if let Some(json) = var("MESHSTORE_LOG_JSON") {
            config.logging.json_format = parse_var("MESHSTORE_LOG_JSON", &json, "JSON flag")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;

        let config: Self = toml::from_str(&contents)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate store config
        if self.store.snapshot_interval == 0 {
            return Err(ConfigError::Invalid(
                "snapshot_interval must be greater than 0".to_string(),
            ));
        }
        if matches!(&self.store.replica_id, Some(id) if id.trim().is_empty()) {
            return Err(ConfigError::Invalid("replica_id must not be empty".to_string()));
        }

        // Validate sync config
        if self.sync.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.sync.mode == TransportMode::Relay && self.sync.relay_address.is_none() {
            return Err(ConfigError::Invalid(
                "relay mode requires relay_address".to_string(),
            ));
        }

        // Validate events config
        if self.events.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "channel_capacity must be greater than 0".to_string(),
            ));
        }

        // Validate logging config
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)?;

        std::fs::write(path, contents)
            .map_err(|source| ConfigError::Write { path: path.to_path_buf(), source })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync.mode, TransportMode::Direct);
        assert_eq!(config.sync.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.sync.timeout_ms = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.sync.mode = TransportMode::Relay;
        assert!(config.validate().is_err());
        config.sync.relay_address = Some("127.0.0.1:4000".to_string());
        assert!(config.validate().is_ok());

        config = Config::default();
        config.events.channel_capacity = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.store.snapshot_interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_level_validation() {
        let mut config = Config::default();

        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_vars() {
        let config = Config::from_vars(vars(&[
            ("MESHSTORE_STORE_DATA_DIR", "/tmp/mesh"),
            ("MESHSTORE_SYNC_MODE", "relay"),
            ("MESHSTORE_SYNC_RELAY_ADDRESS", "relay.example:4000"),
            ("MESHSTORE_SYNC_TIMEOUT_MS", "2500"),
            ("MESHSTORE_SYNC_ENCRYPTION_ENABLED", "false"),
            ("MESHSTORE_SYNC_BOOTSTRAP_PEERS", "127.0.0.1:7000, 127.0.0.1:7001"),
            ("MESHSTORE_EVENTS_CHANNEL_CAPACITY", "16"),
            ("MESHSTORE_LOG_LEVEL", "DEBUG"),
        ]))
        .unwrap();

        assert_eq!(config.store.data_dir, PathBuf::from("/tmp/mesh"));
        assert_eq!(config.sync.mode, TransportMode::Relay);
        assert_eq!(config.sync.relay_address.as_deref(), Some("relay.example:4000"));
        assert_eq!(config.sync.timeout_ms, 2500);
        assert!(!config.sync.encryption_enabled);
        assert_eq!(config.sync.bootstrap_peers.len(), 2);
        assert_eq!(config.events.channel_capacity, 16);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_from_vars_rejects_bad_values() {
        assert!(matches!(
            Config::from_vars(vars(&[("MESHSTORE_SYNC_TIMEOUT_MS", "soon")])),
            Err(ConfigError::BadVariable { var, .. }) if var == "MESHSTORE_SYNC_TIMEOUT_MS"
        ));
        assert!(matches!(
            Config::from_vars(vars(&[("MESHSTORE_SYNC_MODE", "carrier-pigeon")])),
            Err(ConfigError::BadVariable { what: "transport mode", .. })
        ));
        assert!(matches!(
            Config::from_vars(vars(&[("MESHSTORE_SYNC_MODE", "relay")])),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meshstore.toml");

        let mut config = Config::default();
        config.sync.mode = TransportMode::Disabled;
        config.sync.refresh_interval = Duration::from_millis(750);
        config.store.replica_id = Some("replica-1".to_string());
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.sync.mode, TransportMode::Disabled);
        assert_eq!(loaded.sync.refresh_interval, Duration::from_millis(750));
        assert_eq!(loaded.store.replica_id.as_deref(), Some("replica-1"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[sync]\nmode = \"disabled\"\n").unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.sync.mode, TransportMode::Disabled);
        assert_eq!(loaded.events.channel_capacity, 1024);
    }

    #[test]
    fn test_file_errors_name_the_path() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.toml");
        match Config::from_file(&missing) {
            Err(err @ ConfigError::Read { .. }) => {
                assert!(err.to_string().contains("missing.toml"));
            }
            other => panic!("expected a read error, got {:?}", other),
        }

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[sync\nmode = ").unwrap();
        assert!(matches!(Config::from_file(&broken), Err(ConfigError::Parse { path, .. }) if path == broken));

        // A directory cannot be written as a file
        assert!(matches!(
            Config::default().save_to_file(dir.path()),
            Err(ConfigError::Write { .. })
        ));
    }
}
