//! Configuration for the Shopchat relay server.
//!
//! Layered with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/shopchat-relay/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;

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
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the relay.
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
    max_history_per_conversation: Option<usize>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the relay server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Shopchat conversation relay server")]
pub struct RelayCliArgs {
    /// Address to bind the relay server to.
    #[arg(short, long, env = "SHOPCHAT_RELAY_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/shopchat-relay/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum retained messages per conversation.
    #[arg(long)]
    pub max_history: Option<usize>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "SHOPCHAT_RELAY_LOG")]
    pub log_level: String,

    /// Path to a log file (logs to stderr when omitted).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:9100`).
    pub bind_addr: String,
    /// Maximum retained messages per conversation.
    pub max_history_per_conversation: usize,
    /// Log level filter string.
    pub log_level: String,
    /// Optional log file path.
    pub log_file: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9100".to_string(),
            max_history_per_conversation: 500,
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl RelayConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and a missing
    /// file is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `RelayConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &RelayCliArgs, file: &RelayConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            max_history_per_conversation: cli
                .max_history
                .or(file.server.max_history_per_conversation)
                .unwrap_or(defaults.max_history_per_conversation),
            log_level: cli.log_level.clone(),
            log_file: cli.log_file.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the relay.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<RelayConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(RelayConfigFile::default());
        };
        config_dir.join("shopchat-relay").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RelayConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
