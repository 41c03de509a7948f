//! Configuration for the pairline relay server.
//!
//! Layered with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/pairline-relay/config.toml`)
//! 4. Compiled defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use pairline_proto::identity::RoomName;

use crate::heartbeat::HeartbeatConfig;

/// Errors that can occur when loading relay configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// Heartbeat settings that can never keep a connection alive.
    #[error("heartbeat timeout ({timeout_ms} ms) must exceed the interval ({interval_ms} ms)")]
    Heartbeat {
        /// Resolved interval in milliseconds.
        interval_ms: u64,
        /// Resolved timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The default room name is empty.
    #[error("default room name must not be empty")]
    EmptyRoom,
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RelayConfigFile {
    server: ServerFileConfig,
}

/// `[server]` section of the relay config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    default_room: Option<String>,
    heartbeat_interval_ms: Option<u64>,
    heartbeat_timeout_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the relay server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "pairline signaling relay")]
pub struct RelayCliArgs {
    /// Address to bind the relay server to.
    #[arg(short, long, env = "RELAY_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/pairline-relay/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Room every new connection is placed in.
    #[arg(long)]
    pub default_room: Option<String>,

    /// Milliseconds between liveness probes.
    #[arg(long)]
    pub heartbeat_interval_ms: Option<u64>,

    /// Milliseconds without a reply before a connection is evicted.
    #[arg(long)]
    pub heartbeat_timeout_ms: Option<u64>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "RELAY_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:8080`).
    pub bind_addr: String,
    /// Room joined automatically on connect.
    pub default_room: RoomName,
    /// Liveness probe timing.
    pub heartbeat: HeartbeatConfig,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            default_room: RoomName::default(),
            heartbeat: HeartbeatConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// Otherwise the default path is tried and a missing file is treated as
    /// an empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed,
    /// or if the resolved values are inconsistent.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &RelayCliArgs, file: &RelayConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let interval = cli
            .heartbeat_interval_ms
            .or(file.server.heartbeat_interval_ms)
            .map_or(defaults.heartbeat.interval, Duration::from_millis);
        let timeout = cli
            .heartbeat_timeout_ms
            .or(file.server.heartbeat_timeout_ms)
            .map_or(defaults.heartbeat.timeout, Duration::from_millis);
        if timeout <= interval {
            return Err(ConfigError::Heartbeat {
                interval_ms: duration_ms(interval),
                timeout_ms: duration_ms(timeout),
            });
        }

        let default_room = cli
            .default_room
            .clone()
            .or_else(|| file.server.default_room.clone())
            .map_or(defaults.default_room, RoomName::new);
        if default_room.is_empty() {
            return Err(ConfigError::EmptyRoom);
        }

        Ok(Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            default_room,
            heartbeat: HeartbeatConfig { interval, timeout },
            log_level: cli.log_level.clone(),
        })
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Load and parse a TOML config file for the relay.
fn load_config_file(explicit_path: Option<&Path>) -> Result<RelayConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(RelayConfigFile::default());
    };
    let path = config_dir.join("pairline-relay").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RelayConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
