//! Configuration module for editor-relay.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::launcher::LauncherConfig;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Port used when no single positional port is given
pub const DEFAULT_PORT: u16 = 5555;

/// Command-line arguments for the relay
#[derive(Parser, Debug)]
#[command(name = "editor-relay")]
#[command(author = "editor-relay authors")]
#[command(version = "0.1.0")]
#[command(about = "Opens remote path:line requests in a local editor", long_about = None)]
pub struct CliArgs {
    /// Port to listen on. Only honored when exactly one value is given.
    #[arg(value_name = "PORT")]
    pub port: Vec<String>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1)
    #[arg(long)]
    pub host: Option<String>,

    /// Editor executable to launch
    #[arg(long)]
    pub editor: Option<String>,

    /// Seconds a client may stay silent before its connection is dropped (0 = never)
    #[arg(long)]
    pub read_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub launcher: LauncherConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Maximum number of connections handled at once
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Upper bound of a single read
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
    /// Idle read timeout in seconds (0 = no timeout)
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,
    /// Number of worker threads
    pub workers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backlog: default_backlog(),
            max_connections: default_max_connections(),
            read_chunk_size: default_read_chunk_size(),
            read_timeout: default_read_timeout(),
            workers: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_backlog() -> i32 {
    10
}

fn default_max_connections() -> usize {
    64
}

fn default_read_chunk_size() -> usize {
    1024
}

fn default_read_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub backlog: i32,
    pub max_connections: usize,
    pub read_chunk_size: usize,
    pub read_timeout: Option<Duration>,
    pub workers: Option<usize>,
    pub launcher: LauncherConfig,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let port = resolve_port(&cli.port, toml_config.server.port)?;

        let mut launcher = toml_config.launcher;
        if let Some(editor) = cli.editor {
            launcher.executable = editor;
        }

        let read_timeout = cli.read_timeout.unwrap_or(toml_config.server.read_timeout);

        Ok(Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port,
            backlog: toml_config.server.backlog,
            max_connections: toml_config.server.max_connections.max(1),
            read_chunk_size: toml_config.server.read_chunk_size.max(1),
            read_timeout: (read_timeout > 0).then(|| Duration::from_secs(read_timeout)),
            workers: toml_config.server.workers,
            launcher,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }

    /// The `host:port` string the listener binds to.
    pub fn listen_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Pick the listening port from positional arguments.
///
/// Exactly one value selects the port; any other count keeps `fallback`.
fn resolve_port(args: &[String], fallback: u16) -> Result<u16, ConfigError> {
    match args {
        [single] => match single.trim().parse::<u16>() {
            Ok(port) if port > 0 => Ok(port),
            _ => Err(ConfigError::InvalidPort(single.clone())),
        },
        _ => Ok(fallback),
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidPort(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidPort(value) => {
                write!(f, "Invalid port '{value}': expected an integer in 1..=65535")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
