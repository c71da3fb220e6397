//! Configuration module
//!
//! Handles application settings loaded from `config.toml`

mod settings;

pub use settings::{
    AppConfig, ConfigError, DeviceConfig, LoggingConfig, SerialSettings, TcpSettings, TimingConfig,
};

use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "ameba-link", "AmebaLink")
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Default location of the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Get the application data directory
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

/// Directory transcripts are written to when only a file name is given
pub fn transcript_dir() -> Option<PathBuf> {
    data_dir().map(|d| d.join("transcripts"))
}

/// Initialize application directories
pub fn init_directories() -> std::io::Result<()> {
    if let Some(dir) = config_dir() {
        std::fs::create_dir_all(&dir)?;
    }
    if let Some(dir) = transcript_dir() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(())
}
