//! Configuration for the pairline client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/pairline/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use pairline_proto::identity::RoomName;

use crate::signaling::{
    ChannelConfig, DEFAULT_CHANNEL_CAPACITY, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RECONNECT_DELAY,
};

/// Relay URL used when none is configured.
pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:8080";

/// Errors that can occur when loading configuration.
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

    /// The relay URL is not a `ws://` or `wss://` URL.
    #[error("invalid relay url {url:?}: {reason}")]
    InvalidUrl {
        /// The configured value.
        url: String,
        /// What is wrong with it.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    media: MediaFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    relay_url: Option<String>,
    room: Option<String>,
    reconnect_delay_ms: Option<u64>,
    connect_timeout_secs: Option<u64>,
    channel_capacity: Option<usize>,
}

/// `[media]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct MediaFileConfig {
    attach_audio: Option<bool>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Network --
    /// Relay server WebSocket URL.
    pub relay_url: String,
    /// Room to join.
    pub room: RoomName,
    /// Pause before reconnecting after the channel drops.
    pub reconnect_delay: Duration,
    /// Timeout for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Capacity of the signaling and session queues.
    pub channel_capacity: usize,

    // -- Media --
    /// Attach the microphone at startup.
    pub attach_audio: bool,
    /// Share the screen at startup.
    pub share_screen: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            room: RoomName::default(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            attach_audio: false,
            share_screen: false,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read,
    /// any config file cannot be parsed, or the relay URL is invalid.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, &file);
        validate_relay_url(&config.relay_url)?;
        Ok(config)
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            relay_url: cli
                .relay_url
                .clone()
                .or_else(|| file.network.relay_url.clone())
                .unwrap_or(defaults.relay_url),
            room: cli
                .room
                .clone()
                .or_else(|| file.network.room.clone())
                .filter(|r| !r.is_empty())
                .map_or(defaults.room, RoomName::new),
            reconnect_delay: file
                .network
                .reconnect_delay_ms
                .map_or(defaults.reconnect_delay, Duration::from_millis),
            connect_timeout: file
                .network
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            channel_capacity: file
                .network
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
            attach_audio: cli.attach_audio || file.media.attach_audio.unwrap_or(false),
            share_screen: cli.share_screen,
        }
    }

    /// Signaling channel settings derived from this configuration.
    #[must_use]
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            url: self.relay_url.clone(),
            room: self.room.clone(),
            reconnect_delay: self.reconnect_delay,
            connect_timeout: self.connect_timeout,
            capacity: self.channel_capacity,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Two-party call signaling client")]
pub struct CliArgs {
    /// WebSocket URL of the signaling relay.
    #[arg(long, env = "PAIRLINE_RELAY_URL")]
    pub relay_url: Option<String>,

    /// Room to join.
    #[arg(long, env = "PAIRLINE_ROOM")]
    pub room: Option<String>,

    /// Path to config file (default: `~/.config/pairline/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Attach the microphone at startup.
    #[arg(long)]
    pub attach_audio: bool,

    /// Share the screen at startup.
    #[arg(long)]
    pub share_screen: bool,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "PAIRLINE_LOG")]
    pub log_level: String,

    /// Write logs to this file instead of stdout.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn validate_relay_url(raw: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };
    let parsed = url::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(invalid(format!("scheme must be ws or wss, not {other}"))),
    }
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("pairline").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
