//! Configuration for the wireline demo server binary.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::IpAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Command-line arguments for the demo server
#[derive(Parser, Debug)]
#[command(name = "wireline")]
#[command(author = "wireline authors")]
#[command(version = "0.1.0")]
#[command(about = "A line-delimited TCP message server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to listen on (e.g., 127.0.0.1:7878)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Maximum number of concurrent connections
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Frame delimiter character (single ASCII character)
    #[arg(short = 'd', long)]
    pub delimiter: Option<char>,

    /// Maximum frame payload length in bytes
    #[arg(long)]
    pub max_frame_len: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub framing: FramingSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    /// Address to listen on
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Seconds shutdown waits for serving tasks before aborting them
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: u64,
    /// Peer IPs refused at accept time
    #[serde(default)]
    pub deny_list: Vec<IpAddr>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
            shutdown_grace: default_shutdown_grace(),
            deny_list: Vec::new(),
        }
    }
}

/// Framing configuration
#[derive(Debug, Deserialize)]
pub struct FramingSection {
    /// Frame delimiter character
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Maximum frame payload length in bytes
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

impl Default for FramingSection {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            max_frame_len: default_max_frame_len(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:7878".to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_delimiter() -> char {
    '\n'
}

fn default_max_frame_len() -> usize {
    16 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub max_connections: usize,
    pub shutdown_grace: u64,
    pub deny_list: Vec<IpAddr>,
    pub delimiter: u8,
    pub max_frame_len: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Config::resolve(CliArgs::parse())
    }

    fn resolve(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let delimiter = cli.delimiter.unwrap_or(toml_config.framing.delimiter);
        if !delimiter.is_ascii() {
            return Err(ConfigError::Delimiter(delimiter));
        }

        // Merge CLI args with TOML config (CLI takes precedence)
        Ok(Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            shutdown_grace: toml_config.server.shutdown_grace,
            deny_list: toml_config.server.deny_list,
            delimiter: delimiter as u8,
            max_frame_len: cli.max_frame_len.unwrap_or(toml_config.framing.max_frame_len),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{0}': {1}")]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("failed to parse config file '{0}': {1}")]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("delimiter must be a single ASCII character, got {0:?}")]
    Delimiter(char),
}
