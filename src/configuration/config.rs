use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::Parser;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming a configuration file when none is given on the command line.
pub const CONFIG_ENV_VAR: &str = "CATALOGD_CONFIG";

/// Application configuration structure that defines all runtime parameters.
///
/// The configuration is read from a TOML file where every section and key is optional; missing
/// values fall back to their defaults. After parsing, [`Config::validate`] enforces the ranges
/// the runtime relies on.
///
/// # Example
///
/// ```toml
/// [server]
/// bind_address = "0.0.0.0"
/// port = 5555
///
/// [sessions]
/// max_sessions = 64
/// session_timeout_secs = 600
///
/// [change_capture]
/// queue_capacity = 128
/// slow_consumer_timeout_ms = 2000
/// ```
///
/// # Fields Overview
///
/// - `server`: where the HTTP surface binds
/// - `sessions`: session limit, idle timeout and sweep period
/// - `transactions`: optional limit on how long a transaction may stay open
/// - `change_capture`: per-subscription queue capacity and slow-consumer timeout
/// - `tasks`: how many completed tasks stay queryable
/// - `traffic_recording`: retention bounds and the export directory
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub sessions: SessionConfig,
    pub transactions: TransactionConfig,
    pub change_capture: ChangeCaptureConfig,
    pub tasks: TaskConfig,
    pub traffic_recording: TrafficRecordingConfig,
}

impl Config {
    /// Reads and validates a configuration file.
    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        info!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Config, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        debug!("Configuration parsed: {:?}", config);
        Ok(config)
    }

    /// Resolves the configuration from the command line, then `CATALOGD_CONFIG`, then defaults.
    pub fn from_args(args: &CliArgs) -> Result<Config, ConfigError> {
        let path = args
            .config_file
            .clone()
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from));

        let mut config = match path {
            Some(p) => Self::from_file(&p)?,
            None => {
                info!("No configuration file given, using defaults");
                Config::default()
            }
        };

        if let Some(ref addr) = args.bind_address {
            config.server.bind_address = addr.clone();
        }
        if let Some(port) = args.port {
            config.server.port = port;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server
            .bind_address
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::BadIPFormatting(format!("{}: {}", self.server.bind_address, e)))?;

        if self.sessions.max_sessions == 0 {
            return Err(ConfigError::NotInRange(
                "sessions.max_sessions must be greater than 0".into(),
            ));
        }
        if self.sessions.sweep_interval_secs == 0 {
            return Err(ConfigError::NotInRange(
                "sessions.sweep_interval_secs must be greater than 0".into(),
            ));
        }
        if self.change_capture.queue_capacity == 0 {
            return Err(ConfigError::NotInRange(
                "change_capture.queue_capacity must be greater than 0".into(),
            ));
        }
        if self.change_capture.slow_consumer_timeout_ms == 0 {
            return Err(ConfigError::NotInRange(
                "change_capture.slow_consumer_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.tasks.max_finished_tasks == 0 {
            return Err(ConfigError::NotInRange(
                "tasks.max_finished_tasks must be greater than 0".into(),
            ));
        }
        if self.traffic_recording.max_records == 0 {
            return Err(ConfigError::NotInRange(
                "traffic_recording.max_records must be greater than 0".into(),
            ));
        }
        if let Some(parent) = self.traffic_recording.export_directory.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(ConfigError::DirectoryDoesNotExist(format!(
                    "parent of traffic_recording.export_directory ({}) does not exist",
                    parent.display()
                )));
            }
        }
        Ok(())
    }

    pub fn session_timeout(&self) -> Option<Duration> {
        match self.sessions.session_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn transaction_timeout(&self) -> Option<Duration> {
        match self.transactions.transaction_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn retention(&self) -> Option<Duration> {
        match self.traffic_recording.retention_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn slow_consumer_timeout(&self) -> Duration {
        Duration::from_millis(self.change_capture.slow_consumer_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sessions.sweep_interval_secs)
    }

    /// Address the HTTP interface listens on.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip = self
            .server
            .bind_address
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::BadIPFormatting(format!("{}: {}", self.server.bind_address, e)))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }
}

/// Command-line arguments of the `catalogd` binary.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "catalogd")]
#[command(version)]
#[command(about = "Session, transaction and change-capture broker for catalog databases")]
pub struct CliArgs {
    /// Path to the TOML configuration file
    pub config_file: Option<PathBuf>,

    /// Overrides `server.bind_address`
    #[arg(long)]
    pub bind_address: Option<String>,

    /// Overrides `server.port`
    #[arg(long)]
    pub port: Option<u16>,
}
