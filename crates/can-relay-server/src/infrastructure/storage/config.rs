//! TOML configuration for the relay server.
//!
//! Read from an explicit `--config` path or from the platform config file:
//! - Windows:  `%APPDATA%\CanRelay\server.toml`
//! - Linux:    `~/.config/canrelay/server.toml`
//! - macOS:    `~/Library/Application Support/CanRelay/server.toml`
//!
//! ```toml
//! [network]
//! bind_address = "0.0.0.0"
//! port = 5000
//!
//! [bus]
//! adapter = "socketcan"
//! channel = "can0"
//! bitrate = 500000
//! poll_interval_ms = 5
//!
//! [relay]
//! session_queue_capacity = 256
//! send_deadline_ms = 500
//! echo_tx = true
//!
//! [logging]
//! log_level = "info"
//! ```
//!
//! Every field has a serde default, so a missing file, a missing section or
//! a missing key all fall back to the values above.  `adapter` defaults to
//! `socketcan` on Linux builds with the `socketcan` feature (the default) and
//! to `virtual` everywhere else; `socket_send_buffer` is unset by default.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::bus::AdapterKind;
use crate::infrastructure::network::RelayConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// `network.bind_address` is not an IP address.
    #[error("invalid bind address '{0}'")]
    InvalidBindAddress(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub relay: RelaySettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listening socket settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// IP address to bind.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// TCP port clients connect to.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Local CAN interface settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusConfig {
    #[serde(default)]
    pub adapter: AdapterKind,
    /// Interface name, e.g. `can0` or `vcan0`.
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Bit rate in bit/s.
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
    /// Sleep between polls while the bus is idle.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Fan-out behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelaySettings {
    /// Records a client may have queued before broadcasts start waiting on it.
    #[serde(default = "default_queue_capacity")]
    pub session_queue_capacity: usize,
    /// Milliseconds a broadcast waits on a full queue before the client is
    /// disconnected.
    #[serde(default = "default_send_deadline_ms")]
    pub send_deadline_ms: u64,
    /// `SO_SNDBUF` for client sockets; unset keeps the OS default.
    #[serde(default)]
    pub socket_send_buffer: Option<u32>,
    /// Echo frames sent by clients back to every client as `tx` events.
    #[serde(default = "default_true")]
    pub echo_tx: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5000
}
fn default_channel() -> String {
    "can0".to_string()
}
fn default_bitrate() -> u32 {
    500_000
}
fn default_poll_interval_ms() -> u64 {
    5
}
fn default_queue_capacity() -> usize {
    256
}
fn default_send_deadline_ms() -> u64 {
    500
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            adapter: AdapterKind::default(),
            channel: default_channel(),
            bitrate: default_bitrate(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            session_queue_capacity: default_queue_capacity(),
            send_deadline_ms: default_send_deadline_ms(),
            socket_send_buffer: None,
            echo_tx: default_true(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl ServerConfig {
    /// Builds the runtime parameters for a [`RelayServer`](crate::RelayServer).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBindAddress`] if `network.bind_address`
    /// does not parse as an IP address.
    pub fn relay_config(&self) -> Result<RelayConfig, ConfigError> {
        let ip: IpAddr = self
            .network
            .bind_address
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddress(self.network.bind_address.clone()))?;
        let mut relay = RelayConfig::new(SocketAddr::new(ip, self.network.port));
        relay.poll_interval = Duration::from_millis(self.bus.poll_interval_ms.max(1));
        relay.session_queue_capacity = self.relay.session_queue_capacity.max(1);
        relay.send_deadline = Duration::from_millis(self.relay.send_deadline_ms.max(1));
        relay.socket_send_buffer = self.relay.socket_send_buffer;
        relay.echo_tx = self.relay.echo_tx;
        Ok(relay)
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("server.toml"))
}

/// Loads the config from `path`, or from the platform default when `None`.
///
/// A file that does not exist yields [`ServerConfig::default()`].
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match config_file_path() {
            Ok(p) => p,
            // No home directory (e.g. a bare service account): run on defaults.
            Err(ConfigError::NoPlatformConfigDir) => return Ok(ServerConfig::default()),
            Err(e) => return Err(e),
        },
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &ServerConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("CanRelay"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("canrelay"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("CanRelay")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
