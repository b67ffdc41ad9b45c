//! Configuration system for the `LendChat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/lendchat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use lendchat_proto::message::{Identity, PostId};

use crate::session::{CurrentUser, SessionConfig};
use crate::transport::websocket::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT};

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

    /// The gateway URL is not a usable WebSocket URL.
    #[error("invalid gateway URL {url}: {reason}")]
    InvalidUrl {
        /// The configured value.
        url: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A setting needed to start a chat is not configured.
    #[error("missing setting: {0}")]
    Missing(&'static str),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    gateway: GatewayFileConfig,
    user: UserFileConfig,
    session: SessionFileConfig,
    ui: UiFileConfig,
}

/// `[gateway]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct GatewayFileConfig {
    url: Option<String>,
    connect_timeout_secs: Option<u64>,
    handshake_timeout_secs: Option<u64>,
}

/// `[user]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UserFileConfig {
    identity: Option<String>,
    username: Option<String>,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    event_buffer: Option<usize>,
    notice_buffer: Option<usize>,
}

/// `[ui]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UiFileConfig {
    timestamp_format: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Gateway --
    /// Gateway WebSocket URL.
    pub gateway_url: Option<String>,
    /// Timeout for connecting to the gateway.
    pub connect_timeout: Duration,
    /// Timeout for the gateway's handshake acknowledgment.
    pub handshake_timeout: Duration,

    // -- User --
    /// Identity to authenticate as.
    pub identity: Option<String>,
    /// Display name; defaults to the identity.
    pub username: Option<String>,

    // -- Chat --
    /// Post to open the chat about.
    pub post: Option<String>,
    /// User to open the private chat with.
    pub with: Option<String>,
    /// Session channel sizes.
    pub session: SessionConfig,

    // -- UI --
    /// Timestamp display format string (chrono).
    pub timestamp_format: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gateway_url: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            identity: None,
            username: None,
            post: None,
            with: None,
            session: SessionConfig::default(),
            timestamp_format: "%H:%M".to_string(),
        }
    }
}

/// Everything needed to open one private chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTarget {
    /// Validated gateway URL.
    pub gateway_url: url::Url,
    /// The signed-in user.
    pub user: CurrentUser,
    /// The post the chat is about.
    pub post_id: PostId,
    /// The other participant.
    pub with: Identity,
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// Otherwise the default path (`~/.config/lendchat/config.toml`) is
    /// tried and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            gateway_url: cli
                .gateway_url
                .clone()
                .or_else(|| file.gateway.url.clone()),
            connect_timeout: file
                .gateway
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            handshake_timeout: file
                .gateway
                .handshake_timeout_secs
                .map_or(defaults.handshake_timeout, Duration::from_secs),
            identity: cli.identity.clone().or_else(|| file.user.identity.clone()),
            username: cli.username.clone().or_else(|| file.user.username.clone()),
            post: cli.post.clone(),
            with: cli.with.clone(),
            session: SessionConfig {
                event_buffer: file
                    .session
                    .event_buffer
                    .unwrap_or(defaults.session.event_buffer),
                notice_buffer: file
                    .session
                    .notice_buffer
                    .unwrap_or(defaults.session.notice_buffer),
            },
            timestamp_format: cli
                .timestamp_format
                .clone()
                .or_else(|| file.ui.timestamp_format.clone())
                .unwrap_or(defaults.timestamp_format),
        }
    }

    /// Validate the settings needed to open a chat.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Missing`] if the gateway URL, identity, post or
    ///   other user is not configured.
    /// - [`ConfigError::InvalidUrl`] if the gateway URL is not `ws://` or
    ///   `wss://`.
    pub fn chat_target(&self) -> Result<ChatTarget, ConfigError> {
        let raw_url = self
            .gateway_url
            .as_deref()
            .ok_or(ConfigError::Missing("gateway URL (--gateway-url)"))?;
        let gateway_url = parse_gateway_url(raw_url)?;

        let identity = self
            .identity
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("identity (--identity)"))?;
        let post = self
            .post
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("post (--post)"))?;
        let with = self
            .with
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("chat partner (--with)"))?;

        Ok(ChatTarget {
            gateway_url,
            user: CurrentUser {
                identity: Identity::new(identity),
                username: self.username.clone().unwrap_or_else(|| identity.to_string()),
            },
            post_id: PostId::new(post),
            with: Identity::new(with),
        })
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Chat with the other side of a loan post")]
pub struct CliArgs {
    /// WebSocket URL of the gateway.
    #[arg(long, env = "LENDCHAT_GATEWAY_URL")]
    pub gateway_url: Option<String>,

    /// Identity to authenticate as.
    #[arg(long, env = "LENDCHAT_IDENTITY")]
    pub identity: Option<String>,

    /// Display name shown with your messages.
    #[arg(long, env = "LENDCHAT_USERNAME")]
    pub username: Option<String>,

    /// Loan post to chat about.
    #[arg(long)]
    pub post: Option<String>,

    /// Identity of the user to chat with.
    #[arg(long)]
    pub with: Option<String>,

    /// Path to config file (default: `~/.config/lendchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Timestamp display format (chrono format string).
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "LENDCHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/lendchat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn parse_gateway_url(raw: &str) -> Result<url::Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };
    let url = url::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => return Err(invalid(format!("unsupported scheme {other:?}"))),
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("lendchat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> ClientConfig {
        ClientConfig {
            gateway_url: Some("ws://localhost:9100/ws".to_string()),
            identity: Some("lender-1".to_string()),
            post: Some("post-7".to_string()),
            with: Some("borrower-9".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.handshake_timeout, Duration::from_secs(5));
        assert_eq!(config.session, SessionConfig::default());
        assert_eq!(config.timestamp_format, "%H:%M");
        assert!(config.gateway_url.is_none());
    }

    #[test]
    fn toml_parsing_full() {
        let toml_str = r#"
[gateway]
url = "ws://example.com:9100/ws"
connect_timeout_secs = 30
handshake_timeout_secs = 10

[user]
identity = "lender-1"
username = "Lena"

[session]
event_buffer = 512
notice_buffer = 8

[ui]
timestamp_format = "%H:%M:%S"
"#;
        let file: ConfigFile = toml::from_str(toml_str).unwrap();
        let config = ClientConfig::resolve(&CliArgs::default(), &file);

        assert_eq!(
            config.gateway_url.as_deref(),
            Some("ws://example.com:9100/ws")
        );
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.identity.as_deref(), Some("lender-1"));
        assert_eq!(config.username.as_deref(), Some("Lena"));
        assert_eq!(config.session.event_buffer, 512);
        assert_eq!(config.session.notice_buffer, 8);
        assert_eq!(config.timestamp_format, "%H:%M:%S");
    }

    #[test]
    fn toml_parsing_partial() {
        let toml_str = r#"
[gateway]
url = "ws://custom:9100/ws"
"#;
        let file: ConfigFile = toml::from_str(toml_str).unwrap();
        let config = ClientConfig::resolve(&CliArgs::default(), &file);

        assert_eq!(config.gateway_url.as_deref(), Some("ws://custom:9100/ws"));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.session.event_buffer, 256);
    }

    #[test]
    fn cli_overrides_file() {
        let toml_str = r#"
[gateway]
url = "ws://file:9100/ws"

[user]
identity = "file-identity"
username = "File"
"#;
        let file: ConfigFile = toml::from_str(toml_str).unwrap();
        let cli = CliArgs {
            gateway_url: Some("ws://cli:9100/ws".to_string()),
            username: Some("Cli".to_string()),
            timestamp_format: Some("%T".to_string()),
            ..Default::default()
        };
        let config = ClientConfig::resolve(&cli, &file);

        assert_eq!(config.gateway_url.as_deref(), Some("ws://cli:9100/ws"));
        assert_eq!(config.identity.as_deref(), Some("file-identity"));
        assert_eq!(config.username.as_deref(), Some("Cli"));
        assert_eq!(config.timestamp_format, "%T");
    }

    #[test]
    fn unknown_toml_is_a_parse_error() {
        let result: Result<ConfigFile, _> = toml::from_str("[gateway]\nurl = 5\n");
        assert!(result.is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        assert!(load_config_file(None).is_ok());
    }

    #[test]
    fn explicit_missing_config_file_returns_error() {
        let result = load_config_file(Some(std::path::Path::new("/nonexistent/config.toml")));
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn chat_target_from_complete_config() {
        let target = complete().chat_target().unwrap();
        assert_eq!(target.gateway_url.as_str(), "ws://localhost:9100/ws");
        assert_eq!(target.user.identity, Identity::new("lender-1"));
        // Username falls back to the identity.
        assert_eq!(target.user.username, "lender-1");
        assert_eq!(target.post_id, PostId::new("post-7"));
        assert_eq!(target.with, Identity::new("borrower-9"));
    }

    #[test]
    fn chat_target_requires_every_setting() {
        for strip in 0..4 {
            let mut config = complete();
            match strip {
                0 => config.gateway_url = None,
                1 => config.identity = Some(String::new()),
                2 => config.post = None,
                _ => config.with = None,
            }
            assert!(matches!(
                config.chat_target(),
                Err(ConfigError::Missing(_))
            ));
        }
    }

    #[test]
    fn chat_target_rejects_non_websocket_url() {
        let mut config = complete();
        config.gateway_url = Some("http://localhost:9100/ws".to_string());
        assert!(matches!(
            config.chat_target(),
            Err(ConfigError::InvalidUrl { .. })
        ));

        config.gateway_url = Some("not a url".to_string());
        assert!(matches!(
            config.chat_target(),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }
}
