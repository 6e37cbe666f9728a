//! Configuration management for ClipSlot
//!
//! This module handles loading, validating, and managing configuration
//! for slots, peers, transforms and history.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable that overrides `sync.passphrase`
pub const PASSPHRASE_ENV: &str = "CLIPSLOT_PASSPHRASE";

/// Environment variable pointing at a config file
pub const CONFIG_ENV: &str = "CLIPSLOT_CONFIG";

/// Smallest accepted watch interval
pub const MIN_WATCH_INTERVAL_MS: u64 = 250;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// Validation error
    #[error("Config validation failed: {0}")]
    Validation(String),

    /// Peer name not present in `[peers]`
    #[error("Unknown peer '{0}'. Add it under [peers.{0}] in the config file.")]
    UnknownPeer(String),

    /// Transform name not present in `[fx]` or the builtins
    #[error("Unknown transform '{0}'. Run 'clipslot fx list' to see available transforms.")]
    UnknownTransform(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Slot storage settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Remote machines reachable over ssh
    #[serde(default)]
    pub peers: BTreeMap<String, PeerConfig>,

    /// Named transforms
    #[serde(default)]
    pub fx: BTreeMap<String, FxConfig>,

    /// Operation history settings
    #[serde(default)]
    pub history: HistoryConfig,

    /// Watch loop settings
    #[serde(default)]
    pub watch: WatchConfig,

    /// Clipboard limits
    #[serde(default)]
    pub clipboard: ClipboardConfig,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Which slot backend to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    #[default]
    Local,
    ObjectStore,
}

/// Slot encryption algorithm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionKind {
    None,
    #[default]
    Aes256,
}

/// Slot storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub backend: BackendKind,

    #[serde(default)]
    pub encryption: EncryptionKind,

    /// Passphrase for slot encryption
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,

    /// Default slot lifetime in days
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_days: Option<u32>,

    /// Directory for the local backend
    #[serde(default = "default_slot_dir")]
    pub slot_dir: PathBuf,

    #[serde(default)]
    pub object_store: ObjectStoreConfig,
}

impl SyncConfig {
    /// Passphrase from the environment, falling back to the config file
    pub fn resolve_passphrase(&self) -> Option<String> {
        std::env::var(PASSPHRASE_ENV)
            .ok()
            .filter(|p| !p.is_empty())
            .or_else(|| self.passphrase.clone().filter(|p| !p.is_empty()))
    }
}

/// Object storage location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Key prefix that namespaces the slots
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Profile in ~/.aws/credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    /// Custom endpoint for S3-compatible stores (MinIO, R2, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// A remote machine running clipslot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// ssh destination, e.g. `me@workstation`
    pub ssh: String,

    /// Command that runs clipslot on the remote side
    #[serde(default = "default_remote_cmd")]
    pub remote_cmd: String,

    /// Extra arguments passed to ssh before the destination
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_args: Vec<String>,

    /// Timeout for one remote call
    #[serde(default = "default_peer_timeout")]
    pub timeout_secs: u64,
}

impl PeerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// A transform is either an argv list or a shell string
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FxConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,

    #[serde(default)]
    pub description: String,
}

/// History retention
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Maximum number of entries kept; 0 disables history
    #[serde(default = "default_history_limit")]
    pub limit: usize,

    /// Drop entries older than this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_days: Option<u32>,

    /// Collapse repeated operations on identical content
    #[serde(default)]
    pub no_duplicates: bool,

    /// History file
    #[serde(default = "default_history_path")]
    pub path: PathBuf,
}

/// Watch loop timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_watch_interval")]
    pub interval_ms: u64,
}

impl WatchConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(MIN_WATCH_INTERVAL_MS))
    }
}

/// Clipboard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipboardConfig {
    /// Maximum payload size in bytes
    #[serde(default = "default_max_size")]
    pub max_size: usize,
}

// Default value functions
fn default_slot_dir() -> PathBuf {
    PathBuf::from("~/.local/share/clipslot/slots")
}

fn default_prefix() -> String {
    "clipslot".to_string()
}

fn default_remote_cmd() -> String {
    "clipslot".to_string()
}

fn default_peer_timeout() -> u64 {
    30
}

fn default_history_limit() -> usize {
    100
}

fn default_history_path() -> PathBuf {
    PathBuf::from("~/.local/share/clipslot/history.json")
}

fn default_watch_interval() -> u64 {
    1000
}

fn default_max_size() -> usize {
    5_242_880 // 5MB
}

fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations
impl Default for Config {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            peers: BTreeMap::new(),
            fx: BTreeMap::new(),
            history: HistoryConfig::default(),
            watch: WatchConfig::default(),
            clipboard: ClipboardConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            encryption: EncryptionKind::default(),
            passphrase: None,
            ttl_days: None,
            slot_dir: default_slot_dir(),
            object_store: ObjectStoreConfig::default(),
        }
    }
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            region: None,
            prefix: default_prefix(),
            profile: None,
            endpoint: None,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            limit: default_history_limit(),
            ttl_days: None,
            no_duplicates: false,
            path: default_history_path(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_watch_interval(),
        }
    }
}

impl Default for ClipboardConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Checks in order:
    /// 1. Path from CLIPSLOT_CONFIG environment variable
    /// 2. ~/.config/clipslot/config.toml
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_path() {
            Some(path) => Self::load_from_path(&path),
            None => {
                let mut config = Self::default();
                config.expand_paths();
                Ok(config)
            }
        }
    }

    /// Load configuration with optional custom path
    pub fn load_config(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        match config_path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(toml_str)?;
        config.expand_paths();
        config.validate()?;
        Ok(config)
    }

    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("clipslot").join("config.toml"))
    }

    fn find_config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        Self::default_path().filter(|p| p.exists())
    }

    /// Expand tilde in paths
    fn expand_paths(&mut self) {
        self.sync.slot_dir = expand_path(&self.sync.slot_dir);
        self.history.path = expand_path(&self.history.path);
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clipboard.max_size < 1024 {
            return Err(ConfigError::Validation(
                "clipboard.max_size must be at least 1024 bytes (1KB)".to_string(),
            ));
        }
        if self.clipboard.max_size > 52_428_800 {
            return Err(ConfigError::Validation(
                "clipboard.max_size must not exceed 52428800 bytes (50MB)".to_string(),
            ));
        }

        if self.history.limit > 10_000 {
            return Err(ConfigError::Validation(
                "history.limit must not exceed 10000".to_string(),
            ));
        }

        if self.watch.interval_ms < MIN_WATCH_INTERVAL_MS {
            return Err(ConfigError::Validation(format!(
                "watch.interval_ms must be at least {}",
                MIN_WATCH_INTERVAL_MS
            )));
        }

        if self.sync.backend == BackendKind::ObjectStore && self.sync.object_store.bucket.is_none() {
            return Err(ConfigError::Validation(
                "sync.backend is object-store but sync.object_store.bucket is not set".to_string(),
            ));
        }

        for (name, peer) in &self.peers {
            if peer.ssh.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "peers.{}.ssh must not be empty",
                    name
                )));
            }
            if peer.remote_cmd.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "peers.{}.remote_cmd must not be empty",
                    name
                )));
            }
        }

        for (name, fx) in &self.fx {
            match (&fx.cmd, &fx.shell) {
                (Some(cmd), None) if !cmd.is_empty() => {}
                (None, Some(shell)) if !shell.trim().is_empty() => {}
                (Some(_), Some(_)) => {
                    return Err(ConfigError::Validation(format!(
                        "fx.{} sets both cmd and shell; pick one",
                        name
                    )))
                }
                _ => {
                    return Err(ConfigError::Validation(format!(
                        "fx.{} needs a non-empty cmd or shell",
                        name
                    )))
                }
            }
        }

        Ok(())
    }

    /// Look up a peer by name
    pub fn peer(&self, name: &str) -> Result<&PeerConfig, ConfigError> {
        self.peers
            .get(name)
            .ok_or_else(|| ConfigError::UnknownPeer(name.to_string()))
    }

    /// Write an example configuration file
    pub fn write_example(path: &Path, force: bool) -> Result<(), ConfigError> {
        if !force && path.exists() {
            return Err(ConfigError::Validation(
                "Config file already exists. Use --force to overwrite.".to_string(),
            ));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, Self::generate_example())?;
        Ok(())
    }

    /// Generate example configuration file
    pub fn generate_example() -> String {
        let config = Config::default();

        format!(
            r#"# ClipSlot Configuration File
# Location: ~/.config/clipslot/config.toml

# Logging level (trace, debug, info, warn, error)
log_level = "{}"

[sync]
# Slot storage: "local" or "object-store"
backend = "local"
# "aes256" or "none"
encryption = "aes256"
# Passphrase for slot encryption (or set CLIPSLOT_PASSPHRASE)
# passphrase = "correct horse battery staple"
# Slots older than this are treated as absent
# ttl_days = 7
slot_dir = "{}"

[sync.object_store]
# bucket = "my-clipboard"
# region = "eu-west-1"
prefix = "{}"
# profile = "default"
# endpoint = "http://localhost:9000"

# Peers reachable over ssh
# [peers.work]
# ssh = "me@workstation"
# remote_cmd = "clipslot"

# Transforms: either an argv list or a shell string
# [fx.upper]
# cmd = ["tr", "a-z", "A-Z"]
# description = "Uppercase everything"
#
# [fx.trim]
# shell = "sed -e 's/^[[:space:]]*//' -e 's/[[:space:]]*$//'"

[history]
# Number of entries kept (0 disables history)
limit = {}
# ttl_days = 30
no_duplicates = {}

[watch]
interval_ms = {}

[clipboard]
# Maximum clipboard payload size in bytes (5MB default)
max_size = {}
"#,
            config.log_level,
            config.sync.slot_dir.display(),
            config.sync.object_store.prefix,
            config.history.limit,
            config.history.no_duplicates,
            config.watch.interval_ms,
            config.clipboard.max_size,
        )
    }
}

/// Expand tilde in path
fn expand_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    let expanded = shellexpand::tilde(path_str.as_ref());
    PathBuf::from(expanded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.sync.backend, BackendKind::Local);
        assert_eq!(config.sync.encryption, EncryptionKind::Aes256);
        assert_eq!(config.sync.object_store.prefix, "clipslot");
        assert_eq!(config.history.limit, 100);
        assert!(!config.history.no_duplicates);
        assert_eq!(config.clipboard.max_size, 5_242_880);
        assert_eq!(config.log_level, "info");
        assert!(!config.sync.slot_dir.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn test_load_from_toml() {
        let toml_str = r#"
            [sync]
            backend = "object-store"
            encryption = "none"
            ttl_days = 7

            [sync.object_store]
            bucket = "clips"
            region = "eu-west-1"
            prefix = "team"
            profile = "work"

            [peers.desk]
            ssh = "me@desk"
            remote_cmd = "~/bin/clipslot"

            [history]
            limit = 3
            ttl_days = 30
            no_duplicates = true

            [fx.upper]
            cmd = ["tr", "a-z", "A-Z"]
            description = "Uppercase"

            [fx.trim]
            shell = "sed 's/ *$//'"
        "#;

        let config = Config::from_toml(toml_str).unwrap();
        assert_eq!(config.sync.backend, BackendKind::ObjectStore);
        assert_eq!(config.sync.encryption, EncryptionKind::None);
        assert_eq!(config.sync.ttl_days, Some(7));
        assert_eq!(config.sync.object_store.bucket.as_deref(), Some("clips"));
        assert_eq!(config.sync.object_store.profile.as_deref(), Some("work"));

        let desk = config.peer("desk").unwrap();
        assert_eq!(desk.ssh, "me@desk");
        assert_eq!(desk.remote_cmd, "~/bin/clipslot");
        assert_eq!(desk.timeout_secs, 30);

        assert_eq!(config.history.limit, 3);
        assert!(config.history.no_duplicates);
        assert_eq!(
            config.fx["upper"].cmd.as_deref(),
            Some(&["tr".to_string(), "a-z".to_string(), "A-Z".to_string()][..])
        );
        assert_eq!(config.fx["trim"].shell.as_deref(), Some("sed 's/ *$//'"));
    }

    #[test]
    fn test_unknown_peer() {
        let config = Config::default();
        assert!(matches!(
            config.peer("nowhere"),
            Err(ConfigError::UnknownPeer(name)) if name == "nowhere"
        ));
    }

    #[test]
    fn test_validation_max_size() {
        let toml_str = r#"
            [clipboard]
            max_size = 100_000_000
        "#;

        assert!(Config::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_validation_object_store_needs_bucket() {
        let toml_str = r#"
            [sync]
            backend = "object-store"
        "#;

        assert!(matches!(
            Config::from_toml(toml_str),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_validation_fx_needs_exactly_one_invocation() {
        let both = r#"
            [fx.bad]
            cmd = ["cat"]
            shell = "cat"
        "#;
        assert!(Config::from_toml(both).is_err());

        let neither = r#"
            [fx.bad]
            description = "does nothing"
        "#;
        assert!(Config::from_toml(neither).is_err());
    }

    #[test]
    fn test_validation_watch_interval_floor() {
        let toml_str = r#"
            [watch]
            interval_ms = 10
        "#;

        assert!(Config::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let toml_str = r#"
            [sync]
            backend = "ftp"
        "#;

        assert!(matches!(Config::from_toml(toml_str), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_generate_example_parses() {
        let example = Config::generate_example();
        assert!(example.contains("ClipSlot Configuration"));
        assert!(example.contains("max_size = 5242880"));

        let config = Config::from_toml(&example).unwrap();
        assert_eq!(config.history.limit, 100);
    }

    #[test]
    fn test_write_example_refuses_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("clipslot").join("config.toml");

        Config::write_example(&path, false).unwrap();
        assert!(Config::write_example(&path, false).is_err());
        Config::write_example(&path, true).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.sync.backend, BackendKind::Local);
    }
}
