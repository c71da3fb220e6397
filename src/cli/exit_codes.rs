//! CLI Exit Codes
//!
//! Standard exit codes for CLI operations and automation.

use crate::config::ConfigError;
use crate::core::connection::ConnectionError;
use crate::core::response::{ResponseResult, ResponseStatus};
use crate::core::transport::TransportError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Connection failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// No completion within the time budget
    pub const TIMEOUT: u8 = 4;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 5;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 6;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 7;

    /// No suitable link open
    pub const NOT_CONNECTED: u8 = 8;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Success carrying a message
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Error with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Invalid arguments
    pub fn invalid_args(msg: impl Into<String>) -> Self {
        Self::Error(ExitCodes::INVALID_ARGS, msg.into())
    }

    /// Exchange timed out
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Error(ExitCodes::TIMEOUT, msg.into())
    }

    /// Outcome of one exchange
    pub fn from_response(result: &ResponseResult) -> Self {
        match result.status {
            ResponseStatus::Success if result.matches > 0 => {
                Self::success_with_message(format!("{} records counted", result.matches))
            }
            ResponseStatus::Success => Self::success(),
            ResponseStatus::Timeout => Self::timeout(format!(
                "No complete response to '{}' within {:.1}s",
                result.command,
                result.elapsed.as_secs_f64()
            )),
            ResponseStatus::Error => Self::Error(
                ExitCodes::CONNECTION_FAILED,
                result.error.clone().unwrap_or_else(|| "Transport error".to_string()),
            ),
        }
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<&TransportError> for CliResult {
    fn from(err: &TransportError) -> Self {
        let code = match err {
            TransportError::PortNotFound(_) => ExitCodes::PORT_NOT_FOUND,
            TransportError::PermissionDenied(_) => ExitCodes::PERMISSION_DENIED,
            TransportError::InvalidConfiguration(_) => ExitCodes::INVALID_ARGS,
            TransportError::Timeout(_) => ExitCodes::TIMEOUT,
            TransportError::NotConnected => ExitCodes::NOT_CONNECTED,
            _ => ExitCodes::CONNECTION_FAILED,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<&ConnectionError> for CliResult {
    fn from(err: &ConnectionError) -> Self {
        match err {
            ConnectionError::Transport(inner) => inner.into(),
            ConnectionError::ProbeFailed(_) => Self::Error(ExitCodes::CONNECTION_FAILED, err.to_string()),
            ConnectionError::NothingToRearm => Self::invalid_args(err.to_string()),
            ConnectionError::NotConnected(_)
            | ConnectionError::NoTransportAvailable
            | ConnectionError::SerialRequired(_)
            | ConnectionError::TcpLinkOpen(_) => Self::Error(ExitCodes::NOT_CONNECTED, err.to_string()),
        }
    }
}

impl From<&ConfigError> for CliResult {
    fn from(err: &ConfigError) -> Self {
        Self::Error(ExitCodes::CONFIG_ERROR, err.to_string())
    }
}

/// Map an error chain to an exit code by its first recognized cause
pub fn classify(err: &anyhow::Error) -> CliResult {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<ConnectionError>() {
            return e.into();
        }
        if let Some(e) = cause.downcast_ref::<TransportError>() {
            return e.into();
        }
        if let Some(e) = cause.downcast_ref::<ConfigError>() {
            return e.into();
        }
    }
    CliResult::Error(ExitCodes::ERROR, format!("{:#}", err))
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        4 => "Response timeout",
        5 => "Port not found",
        6 => "Permission denied",
        7 => "Configuration error",
        8 => "Not connected",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in [0, 1, 2, 3, 4, 5, 6, 7, 8, 127] {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}
