//! Configuration for the Shopchat client.
//!
//! Layered: an optional TOML config file over compiled defaults. A missing
//! file at the default path (`~/.config/shopchat/config.toml`) is not an
//! error; an explicit path that doesn't exist is. The embedding application
//! passes the resolved [`ClientConfig`] to the session and relay client.

use std::path::PathBuf;
use std::time::Duration;

use shopchat_proto::message::SenderRole;

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

    /// The `sender_role` value is not a known role.
    #[error("invalid sender_role in config: {0}")]
    InvalidRole(#[from] shopchat_proto::message::UnknownRole),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    connection: ConnectionFileConfig,
    session: SessionFileConfig,
    polling: PollingFileConfig,
}

/// `[connection]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConnectionFileConfig {
    relay_url: Option<String>,
    connect_timeout_secs: Option<u64>,
    welcome_timeout_secs: Option<u64>,
    submit_timeout_secs: Option<u64>,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    sender_role: Option<String>,
    event_buffer: Option<usize>,
}

/// `[polling]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct PollingFileConfig {
    interval_secs: Option<u64>,
    fetch_limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay server WebSocket URL, if this client connects live.
    pub relay_url: Option<String>,
    /// Timeout for establishing the relay WebSocket connection.
    pub connect_timeout: Duration,
    /// Timeout for the relay's `Welcome` handshake acknowledgment.
    pub welcome_timeout: Duration,
    /// Timeout for a submission's direct response.
    pub submit_timeout: Duration,
    /// Role stamped on outgoing messages.
    pub sender_role: SenderRole,
    /// Buffer size for the session event channel.
    pub event_buffer: usize,
    /// Polling fallback interval.
    pub poll_interval: Duration,
    /// Maximum messages fetched per poll.
    pub poll_fetch_limit: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            connect_timeout: Duration::from_secs(10),
            welcome_timeout: Duration::from_secs(5),
            submit_timeout: Duration::from_secs(10),
            sender_role: SenderRole::Customer,
            event_buffer: 64,
            poll_interval: Duration::from_secs(5),
            poll_fetch_limit: 50,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file merged over defaults.
    ///
    /// If `explicit_path` is `Some`, the file must exist. If `None`, the
    /// default path is tried and a missing file means defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or if
    /// it names an unknown sender role.
    pub fn load(explicit_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let file = load_config_file(explicit_path)?;
        Self::resolve(&file)
    }

    /// Resolve a `ClientConfig` from a parsed config file over defaults.
    ///
    /// Separated from `load()` to enable unit testing without the
    /// filesystem.
    fn resolve(file: &ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let sender_role = match file.session.sender_role.as_deref() {
            Some(role) => role.parse()?,
            None => defaults.sender_role,
        };

        Ok(Self {
            relay_url: file.connection.relay_url.clone(),
            connect_timeout: file
                .connection
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            welcome_timeout: file
                .connection
                .welcome_timeout_secs
                .map_or(defaults.welcome_timeout, Duration::from_secs),
            submit_timeout: file
                .connection
                .submit_timeout_secs
                .map_or(defaults.submit_timeout, Duration::from_secs),
            sender_role,
            event_buffer: file.session.event_buffer.unwrap_or(defaults.event_buffer),
            poll_interval: file
                .polling
                .interval_secs
                .map_or(defaults.poll_interval, Duration::from_secs),
            poll_fetch_limit: file
                .polling
                .fetch_limit
                .unwrap_or(defaults.poll_fetch_limit),
        })
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            // No config dir available — use defaults.
            return Ok(ConfigFile::default());
        };
        config_dir.join("shopchat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
