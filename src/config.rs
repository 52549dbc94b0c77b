//! Configuration module for the serve-a-page server.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::ops::RangeInclusive;
use std::path::PathBuf;

/// Ports accepted at startup: the IANA registered range. Privileged and
/// ephemeral ports are rejected.
pub const PORT_RANGE: RangeInclusive<u16> = 1024..=49151;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "serve-a-page")]
#[command(author = "serve-a-page authors")]
#[command(version = "0.1.0")]
#[command(about = "A minimal single-threaded HTTP server", long_about = None)]
pub struct CliArgs {
    /// TCP port to listen on (1024-49151)
    #[arg(default_value_t = 8080)]
    pub port: u16,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

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
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// IPv4 address to bind to
    #[serde(default = "default_bind")]
    pub bind: Ipv4Addr,
    /// Largest request header block accepted, in bytes
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_request_bytes: default_max_request_bytes(),
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

fn default_bind() -> Ipv4Addr {
    // Wildcard: listen on every interface.
    Ipv4Addr::UNSPECIFIED
}

fn default_max_request_bytes() -> usize {
    64 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: Ipv4Addr,
    pub max_request_bytes: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::resolve(CliArgs::parse())
    }

    fn resolve(cli: CliArgs) -> Result<Self, ConfigError> {
        if !PORT_RANGE.contains(&cli.port) {
            return Err(ConfigError::PortOutOfRange(cli.port));
        }

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Config {
            port: cli.port,
            bind: toml_config.server.bind,
            max_request_bytes: toml_config.server.max_request_bytes,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }

    /// Address handed to the server's bind step.
    pub fn bind_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.bind, self.port)
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    PortOutOfRange(u16),
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::PortOutOfRange(port) => {
                write!(
                    f,
                    "Port {} is outside the allowed range {}-{}",
                    port,
                    PORT_RANGE.start(),
                    PORT_RANGE.end()
                )
            }
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
