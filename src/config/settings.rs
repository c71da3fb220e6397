//! Application settings

use crate::core::commands::CommandTimings;
use crate::core::connection::LinkSettings;
use crate::core::transcript::TranscriptFormat;
use crate::core::transport::TELNET_PORT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No platform configuration directory
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// Reading or writing the file failed
    #[error("Config file {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema
    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Serializing the configuration failed
    #[error("Could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of range
    #[error("Invalid setting {key}: {reason}")]
    Invalid {
        /// Setting name
        key: &'static str,
        /// What is wrong
        reason: String,
    },
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Serial link defaults
    pub serial: SerialSettings,
    /// TCP link defaults
    pub tcp: TcpSettings,
    /// Time budgets
    pub timing: TimingConfig,
    /// Console dialect
    pub device: DeviceConfig,
    /// Log and transcript settings
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load config from the default location; a missing file yields defaults
    pub fn load() -> Result<Self, ConfigError> {
        let path = super::config_path().ok_or(ConfigError::NoConfigDir)?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from an explicit file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = super::config_path().ok_or(ConfigError::NoConfigDir)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        self.save_to(&path)
    }

    /// Save config to an explicit file
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial.baud == 0 {
            return Err(ConfigError::Invalid {
                key: "serial.baud",
                reason: "must be greater than zero".into(),
            });
        }
        if self.device.probe_command.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "device.probe_command",
                reason: "must not be empty".into(),
            });
        }
        for (key, value) in [
            ("timing.connect_timeout_ms", self.timing.connect_timeout_ms),
            ("timing.probe_timeout_ms", self.timing.probe_timeout_ms),
            ("timing.command_timeout_ms", self.timing.command_timeout_ms),
            ("timing.scan_timeout_ms", self.timing.scan_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than zero".into(),
                });
            }
        }
        Ok(())
    }

    /// Settings used when opening links
    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            connect_timeout: ms(self.timing.connect_timeout_ms),
            probe_timeout: ms(self.timing.probe_timeout_ms),
            telnet_grace: ms(self.timing.telnet_grace_ms),
            telnet_port: self.tcp.telnet_port,
            probe_command: self.device.probe_command.clone(),
            prompt: self.device.prompt,
        }
    }

    /// Time budgets for the command catalog
    pub fn command_timings(&self) -> CommandTimings {
        CommandTimings {
            command: ms(self.timing.command_timeout_ms),
            status: ms(self.timing.status_timeout_ms),
            scan: ms(self.timing.scan_timeout_ms),
            scan_idle: ms(self.timing.scan_idle_ms),
            snapshot: ms(self.timing.snapshot_timeout_ms),
            kvs_start: ms(self.timing.kvs_start_timeout_ms),
            kvs_done: ms(self.timing.kvs_done_timeout_ms),
        }
    }
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

/// Serial link defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Port opened when neither `--serial` nor `AMEBA_SERIAL` names one
    pub port: Option<String>,
    /// Baud rate
    pub baud: u32,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self { port: None, baud: 115_200 }
    }
}

/// TCP link defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpSettings {
    /// Host connected to when neither `--tcp` nor `AMEBA_HOST` names one
    pub host: Option<String>,
    /// TCP port used when `--port` is absent
    pub port: u16,
    /// Port whose console opens with Telnet negotiation
    pub telnet_port: u16,
}

impl Default for TcpSettings {
    fn default() -> Self {
        Self { host: None, port: TELNET_PORT, telnet_port: TELNET_PORT }
    }
}

/// Time budgets, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// TCP connect budget
    pub connect_timeout_ms: u64,
    /// Probe reply budget after opening
    pub probe_timeout_ms: u64,
    /// Short command budget
    pub command_timeout_ms: u64,
    /// `ATW?` budget
    pub status_timeout_ms: u64,
    /// Wait before draining the Telnet preamble
    pub telnet_grace_ms: u64,
    /// Network scan budget
    pub scan_timeout_ms: u64,
    /// Idle threshold after the last scan record
    pub scan_idle_ms: u64,
    /// Grace read after an end marker
    pub grace_read_ms: u64,
    /// Snapshot budget
    pub snapshot_timeout_ms: u64,
    /// KVS recording start budget
    pub kvs_start_timeout_ms: u64,
    /// KVS recording upload budget
    pub kvs_done_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            probe_timeout_ms: 2_000,
            command_timeout_ms: 2_000,
            status_timeout_ms: 3_000,
            telnet_grace_ms: 100,
            scan_timeout_ms: 15_000,
            scan_idle_ms: 1_500,
            grace_read_ms: 500,
            snapshot_timeout_ms: 10_000,
            kvs_start_timeout_ms: 180_000,
            kvs_done_timeout_ms: 60_000,
        }
    }
}

impl TimingConfig {
    /// Grace read after an end marker
    pub fn grace_read(&self) -> Duration {
        ms(self.grace_read_ms)
    }

    /// Short command budget
    pub fn command_timeout(&self) -> Duration {
        ms(self.command_timeout_ms)
    }
}

/// Console dialect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Prompt character printed when the console is idle
    pub prompt: char,
    /// Command sent right after opening a link
    pub probe_command: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            prompt: crate::core::policy::DEFAULT_PROMPT,
            probe_command: "AT".to_string(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive used when `RUST_LOG` is not set
    pub level: String,
    /// Transcript file written for every session
    pub transcript: Option<PathBuf>,
    /// Transcript format
    pub transcript_format: TranscriptFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            transcript: None,
            transcript_format: TranscriptFormat::Text,
        }
    }
}
