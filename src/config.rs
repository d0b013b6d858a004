//! Configuration module for packet-relay.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use crate::runtime::{Endpoint, RetryPolicy};

/// Command-line arguments for the relay
#[derive(Parser, Debug)]
#[command(name = "packet-relay")]
#[command(author = "packet-relay authors")]
#[command(version = "0.1.0")]
#[command(about = "Send console tokens over TCP and print them on the other side", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// IPv4 address both roles use (e.g., 127.0.0.1)
    #[arg(short = 'a', long)]
    pub address: Option<Ipv4Addr>,

    /// TCP port both roles use
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Connect without waiting for the listener to report ready
    #[arg(long)]
    pub no_wait: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub receive: ReceiveConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network-related configuration
#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_address")]
    pub address: Ipv4Addr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Wait for the listener's ready signal before connecting
    #[serde(default = "default_wait_for_listener")]
    pub wait_for_listener: bool,
    /// Upper bound on that wait in milliseconds
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            wait_for_listener: default_wait_for_listener(),
            ready_timeout_ms: default_ready_timeout_ms(),
        }
    }
}

/// Receive loop configuration
#[derive(Debug, Deserialize)]
pub struct ReceiveConfig {
    /// Socket read timeout in milliseconds
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Failed receive attempts tolerated per packet (absent = unbounded)
    pub max_attempts: Option<u32>,
    /// Pause between failed attempts in milliseconds (0 with no
    /// `max_attempts` retries immediately and forever)
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: default_read_timeout_ms(),
            max_attempts: None,
            backoff_ms: default_backoff_ms(),
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

fn default_address() -> Ipv4Addr {
    Ipv4Addr::LOCALHOST
}

fn default_port() -> u16 {
    4900
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_wait_for_listener() -> bool {
    true
}

fn default_ready_timeout_ms() -> u64 {
    2_000
}

fn default_read_timeout_ms() -> u64 {
    250
}

fn default_backoff_ms() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: Endpoint,
    pub connect_timeout: Duration,
    pub wait_for_listener: bool,
    pub ready_timeout: Duration,
    pub read_timeout: Duration,
    pub retry: RetryPolicy,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let network = toml_config.network;
        let receive = toml_config.receive;

        Config {
            endpoint: Endpoint::new(
                cli.address.unwrap_or(network.address),
                cli.port.unwrap_or(network.port),
            ),
            connect_timeout: Duration::from_millis(network.connect_timeout_ms),
            wait_for_listener: !cli.no_wait && network.wait_for_listener,
            ready_timeout: Duration::from_millis(network.ready_timeout_ms),
            read_timeout: Duration::from_millis(receive.read_timeout_ms),
            retry: match (receive.max_attempts, receive.backoff_ms) {
                (None, 0) => RetryPolicy::SPIN,
                (max_attempts, backoff_ms) => RetryPolicy {
                    max_attempts,
                    backoff: Duration::from_millis(backoff_ms),
                },
            },
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
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
        }
    }
}

impl std::error::Error for ConfigError {}
