//! Configuration module for shark-server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "shark-server")]
#[command(author = "shark-server authors")]
#[command(version = "0.1.0")]
#[command(about = "Stock portfolio request/response server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:5555)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Activity monitor polling interval in milliseconds
    #[arg(short = 'i', long)]
    pub monitor_interval: Option<u64>,

    /// Shut down after this many milliseconds without clients
    #[arg(short = 's', long)]
    pub idle_shutdown: Option<u64>,

    /// Maximum number of concurrent connections (0 = unbounded)
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Per-message read deadline in milliseconds (0 = none)
    #[arg(short = 't', long)]
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
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Listen backlog handed to the kernel
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Concurrent connection cap (0 = unbounded)
    #[serde(default)]
    pub max_connections: usize,
    /// Per-message read deadline in milliseconds (0 = none)
    #[serde(default)]
    pub read_timeout_ms: u64,
    /// Largest accepted frame body in bytes
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
            max_connections: 0,
            read_timeout_ms: 0,
            max_frame_len: default_max_frame_len(),
        }
    }
}

/// Activity monitor configuration
#[derive(Debug, Deserialize)]
pub struct MonitorConfig {
    /// Polling interval in milliseconds
    #[serde(default = "default_monitor_interval")]
    pub interval_ms: u64,
    /// Idle period after which the server stops itself, in milliseconds
    #[serde(default = "default_idle_shutdown")]
    pub idle_shutdown_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_monitor_interval(),
            idle_shutdown_ms: default_idle_shutdown(),
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

fn default_listen() -> String {
    "127.0.0.1:5555".to_string()
}

fn default_backlog() -> i32 {
    1024
}

fn default_max_frame_len() -> usize {
    4 * 1024 * 1024 // 4 MB
}

fn default_monitor_interval() -> u64 {
    5_000
}

fn default_idle_shutdown() -> u64 {
    300_000 // 5 minutes
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub backlog: i32,
    pub max_connections: usize,
    pub read_timeout_ms: u64,
    pub max_frame_len: usize,
    pub monitor_interval_ms: u64,
    pub idle_shutdown_ms: u64,
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

        let config = Self::merge(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            backlog: toml_config.server.backlog,
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            read_timeout_ms: cli
                .read_timeout
                .unwrap_or(toml_config.server.read_timeout_ms),
            max_frame_len: toml_config.server.max_frame_len,
            monitor_interval_ms: cli
                .monitor_interval
                .unwrap_or(toml_config.monitor.interval_ms),
            idle_shutdown_ms: cli
                .idle_shutdown
                .unwrap_or(toml_config.monitor.idle_shutdown_ms),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    /// Reject values the server cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let addr = self.listen_addr()?;
        if addr.port() == 0 {
            return Err(ConfigError::Invalid("listen", "port must be positive".into()));
        }
        if self.backlog <= 0 {
            return Err(ConfigError::Invalid("backlog", "must be positive".into()));
        }
        if self.max_frame_len == 0 {
            return Err(ConfigError::Invalid("max_frame_len", "must be positive".into()));
        }
        if self.monitor_interval_ms == 0 {
            return Err(ConfigError::Invalid("monitor.interval_ms", "must be positive".into()));
        }
        if self.idle_shutdown_ms == 0 {
            return Err(ConfigError::Invalid(
                "monitor.idle_shutdown_ms",
                "must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Parsed listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen
            .parse()
            .map_err(|e| ConfigError::Invalid("listen", format!("'{}': {}", self.listen, e)))
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn idle_shutdown(&self) -> Duration {
        Duration::from_millis(self.idle_shutdown_ms)
    }

    /// Read deadline per message, if one is configured.
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }
}

#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        Config {
            listen: "127.0.0.1:0".to_string(),
            backlog: default_backlog(),
            max_connections: 0,
            read_timeout_ms: 0,
            max_frame_len: default_max_frame_len(),
            monitor_interval_ms: default_monitor_interval(),
            idle_shutdown_ms: default_idle_shutdown(),
            log_level: default_log_level(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(&'static str, String),
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
            ConfigError::Invalid(key, reason) => {
                write!(f, "Invalid configuration value for '{}': {}", key, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
