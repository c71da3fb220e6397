//! Transport layer for the two link types an Ameba board exposes
//!
//! Supports:
//! - Serial ports (USB-Serial adapters on the board's log UART)
//! - Raw TCP connections, including the board's Telnet console on port 23

mod serial;
mod tcp;
pub mod telnet;

pub use serial::{list_ports, PortDescription, SerialConfig, SerialTransport};
pub use tcp::{TcpConfig, TcpTransport};
pub use telnet::{PreambleReport, TelnetPreamble, TELNET_PORT};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Transport type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Serial port
    Serial,
    /// Raw TCP (optionally a Telnet console)
    Tcp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "serial"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "serial" => Ok(Self::Serial),
            "tcp" | "telnet" => Ok(Self::Tcp),
            other => Err(TransportError::InvalidConfiguration(format!(
                "unknown transport '{}', expected 'serial' or 'tcp'",
                other
            ))),
        }
    }
}

/// Identifying parameters of an open transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Endpoint {
    /// Serial port and the baud rate it was opened with
    Serial {
        /// Port name (e.g. COM3, /dev/ttyUSB0)
        port: String,
        /// Baud rate
        baud: u32,
    },
    /// TCP peer
    Tcp {
        /// Host name or address
        host: String,
        /// TCP port
        port: u16,
    },
}

impl Endpoint {
    /// Transport kind this endpoint belongs to
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Serial { .. } => TransportKind::Serial,
            Self::Tcp { .. } => TransportKind::Tcp,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial { port, baud } => write!(f, "{} @ {} baud", port, baud),
            Self::Tcp { host, port } => write!(f, "{}:{}", host, port),
        }
    }
}

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection timeout
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// The peer went away (EOF, dead socket, unplugged adapter)
    #[error("Disconnected")]
    Disconnected,
}

impl TransportError {
    /// Whether the error proves the peer is gone and the slot should be cleared
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Disconnected | Self::NotConnected => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Writes performed
    pub packets_sent: u64,
    /// Non-empty reads performed
    pub packets_received: u64,
    /// Errors count
    pub errors: u64,
    /// Connection uptime in seconds
    pub uptime_secs: u64,
}

/// Byte-level channel to the device.
///
/// Reads never block past the `wait` they are given. An empty `Bytes`
/// means "nothing arrived yet"; a broken peer is reported as an error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransportTrait: Send + Sync {
    /// Write all of `data`
    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read whatever arrives within `wait` (empty when nothing did)
    async fn receive(&mut self, wait: Duration) -> Result<Bytes, TransportError>;

    /// Read bytes that are already buffered without waiting
    async fn try_receive(&mut self) -> Result<Bytes, TransportError>;

    /// Check that the peer is still there
    async fn probe(&mut self) -> Result<(), TransportError>;

    /// Close the channel
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Get transport kind
    fn kind(&self) -> TransportKind;

    /// Get connection info string
    fn connection_info(&self) -> String;

    /// Get statistics
    fn stats(&self) -> TransportStats;
}
