//! Configuration management for Tokengate.
//!
//! Values are layered, lowest precedence first: built-in defaults, an
//! optional YAML file, `TOKENGATE_`-prefixed environment variables (nested
//! keys separated by `__`, e.g. `TOKENGATE_BUCKET__RATE`), and finally
//! command-line flags.

use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::{GateError, Result};

/// Main configuration for the Tokengate service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Token bucket configuration
    #[serde(default)]
    pub bucket: BucketConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Whether a line on standard input stops the server
    #[serde(default = "default_interactive_cancel")]
    pub interactive_cancel: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            interactive_cancel: default_interactive_cancel(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_interactive_cancel() -> bool {
    true
}

/// Token bucket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BucketConfig {
    /// Tokens added per second
    #[serde(default = "default_rate")]
    pub rate: f64,

    /// Maximum tokens held
    #[serde(default = "default_capacity")]
    pub capacity: u64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            capacity: default_capacity(),
        }
    }
}

fn default_rate() -> f64 {
    10.0
}

fn default_capacity() -> u64 {
    20
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Command-line flags.
#[derive(Debug, Default, Parser)]
#[command(name = "tokengate", version, about = "Token-bucket rate-limited HTTP endpoint")]
pub struct CliArgs {
    /// Path to a YAML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Requests per second rate limit
    #[arg(long)]
    pub rate: Option<f64>,

    /// Request capacity
    #[arg(long)]
    pub capacity: Option<u64>,

    /// Address to listen on
    #[arg(long)]
    pub listen: Option<String>,

    /// Log filter directive (e.g. "debug" or "tokengate=trace")
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Do not stop the server on a line from standard input
    #[arg(long)]
    pub no_stdin_cancel: bool,
}

impl GateConfig {
    /// Load configuration from an optional file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("TOKENGATE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Apply command-line flags on top of the loaded values.
    pub fn apply_cli(&mut self, cli: &CliArgs) {
        if let Some(rate) = cli.rate {
            self.bucket.rate = rate;
        }
        if let Some(capacity) = cli.capacity {
            self.bucket.capacity = capacity;
        }
        if let Some(ref listen) = cli.listen {
            self.server.listen_addr = listen.clone();
        }
        if let Some(ref level) = cli.log_level {
            self.logging.level = level.clone();
        }
        if let Some(format) = cli.log_format {
            self.logging.format = format;
        }
        if cli.no_stdin_cancel {
            self.server.interactive_cancel = false;
        }
    }

    /// Check that rate and capacity are usable.
    pub fn validate(&self) -> Result<()> {
        if !self.bucket.rate.is_finite() || self.bucket.rate <= 0.0 {
            return Err(GateError::Config(format!(
                "rate must be a positive number, got {}",
                self.bucket.rate
            )));
        }
        if self.bucket.capacity == 0 {
            return Err(GateError::Config(
                "capacity must be greater than zero".to_string(),
            ));
        }
        if self.server.listen_addr.trim().is_empty() {
            return Err(GateError::Config("listen address must not be empty".to_string()));
        }
        Ok(())
    }
}
