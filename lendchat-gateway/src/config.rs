//! Gateway settings.
//!
//! Values come from the command line (or its environment variables), then
//! `~/.config/lendchat-gateway/config.toml`, then built-in defaults. The
//! result is checked before the server starts: the bind address must parse
//! as a socket address and no limit may be zero.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use lendchat_proto::message::MAX_MESSAGE_SIZE;

/// Errors produced while loading or checking gateway settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for these settings.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The bind address is not `host:port` with a numeric host.
    #[error("invalid bind address {value:?}: {source}")]
    InvalidBindAddr {
        /// The rejected value.
        value: String,
        /// Parse failure.
        source: std::net::AddrParseError,
    },

    /// A limit was set to zero.
    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),
}

/// Capacity limits enforced by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Largest accepted message body, in bytes.
    pub max_payload_size: usize,
    /// Messages kept per room before the oldest is evicted.
    pub max_room_history: usize,
    /// Private rooms the directory holds.
    pub max_rooms: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_MESSAGE_SIZE,
            max_room_history: 1000,
            max_rooms: 10_000,
        }
    }
}

impl Limits {
    fn validate(self) -> Result<Self, ConfigError> {
        if self.max_payload_size == 0 {
            return Err(ConfigError::ZeroLimit("max_payload_size"));
        }
        if self.max_room_history == 0 {
            return Err(ConfigError::ZeroLimit("max_room_history"));
        }
        if self.max_rooms == 0 {
            return Err(ConfigError::ZeroLimit("max_rooms"));
        }
        Ok(self)
    }
}

/// Command-line flags of `lendchat-gateway`.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "LendChat gateway")]
pub struct GatewayCliArgs {
    /// Socket address to listen on, e.g. `127.0.0.1:9100`.
    #[arg(short, long, env = "GATEWAY_ADDR")]
    pub bind: Option<String>,

    /// Config file to read instead of the default location.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Largest accepted message body, in bytes.
    #[arg(long)]
    pub max_payload_size: Option<usize>,

    /// Messages kept per room.
    #[arg(long)]
    pub max_room_history: Option<usize>,

    /// Private rooms the gateway will hold.
    #[arg(long)]
    pub max_rooms: Option<usize>,

    /// Log filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "GATEWAY_LOG")]
    pub log_level: String,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileSettings {
    gateway: FileGateway,
    limits: FileLimits,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileGateway {
    bind: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileLimits {
    max_payload_size: Option<usize>,
    max_room_history: Option<usize>,
    max_rooms: Option<usize>,
}

/// Checked gateway settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address the server binds.
    pub bind_addr: SocketAddr,
    /// Capacity limits.
    pub limits: Limits,
    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl GatewayConfig {
    /// Default listen address.
    pub const DEFAULT_BIND: &'static str = "0.0.0.0:9100";

    /// Read the config file and combine it with `cli`.
    ///
    /// A missing file at the default location counts as empty; a missing
    /// file named with `--config` is an error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or the
    /// combined settings fail validation.
    pub fn load(cli: &GatewayCliArgs) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => read_settings(path)?,
            None => match default_path() {
                Some(path) if path.exists() => read_settings(&path)?,
                _ => FileSettings::default(),
            },
        };
        Self::combine(cli, file)
    }

    fn combine(cli: &GatewayCliArgs, file: FileSettings) -> Result<Self, ConfigError> {
        let defaults = Limits::default();
        let limits = Limits {
            max_payload_size: cli
                .max_payload_size
                .or(file.limits.max_payload_size)
                .unwrap_or(defaults.max_payload_size),
            max_room_history: cli
                .max_room_history
                .or(file.limits.max_room_history)
                .unwrap_or(defaults.max_room_history),
            max_rooms: cli
                .max_rooms
                .or(file.limits.max_rooms)
                .unwrap_or(defaults.max_rooms),
        }
        .validate()?;

        let bind = cli
            .bind
            .clone()
            .or(file.gateway.bind)
            .unwrap_or_else(|| Self::DEFAULT_BIND.to_string());
        let bind_addr = bind
            .parse()
            .map_err(|source| ConfigError::InvalidBindAddr {
                value: bind.clone(),
                source,
            })?;

        Ok(Self {
            bind_addr,
            limits,
            log_level: cli.log_level.clone(),
        })
    }
}

fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("lendchat-gateway").join("config.toml"))
}

fn read_settings(path: &Path) -> Result<FileSettings, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&contents)?)
}
