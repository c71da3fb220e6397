//! Serial port transport implementation

use super::{TransportError, TransportKind, TransportStats, TransportTrait};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, SerialPort, SerialPortType};
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

const READ_CHUNK: usize = 4096;

/// Serial port configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port name (e.g., COM3, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Write timeout
    pub write_timeout: Duration,
}

impl SerialConfig {
    /// Create a new serial configuration (8N1, no flow control)
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            write_timeout: Duration::from_secs(1),
        }
    }

    /// Set write timeout
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("COM1", 115200)
    }
}

type SharedPort = Arc<Mutex<Option<Box<dyn SerialPort>>>>;

/// Serial port transport.
///
/// `serialport` is blocking, so every read and write runs on tokio's
/// blocking pool with the handle shared through a mutex.
pub struct SerialTransport {
    config: SerialConfig,
    port: SharedPort,
    stats: Arc<RwLock<TransportStats>>,
    connected_at: Option<Instant>,
}

impl SerialTransport {
    /// Create a new (closed) serial transport
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            port: Arc::new(Mutex::new(None)),
            stats: Arc::new(RwLock::new(TransportStats::default())),
            connected_at: None,
        }
    }

    /// Open the OS device
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        let config = self.config.clone();
        let port = tokio::task::spawn_blocking(move || {
            serialport::new(&config.port, config.baud_rate)
                .timeout(config.write_timeout)
                .open()
                .map_err(|e| match e.kind() {
                    serialport::ErrorKind::NoDevice => {
                        TransportError::PortNotFound(config.port.clone())
                    }
                    serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                        TransportError::PortNotFound(config.port.clone())
                    }
                    serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                        TransportError::PermissionDenied(config.port.clone())
                    }
                    _ => TransportError::ConnectionFailed(e.to_string()),
                })
        })
        .await
        .map_err(join_error)??;

        *self.port.lock() = Some(port);
        self.connected_at = Some(Instant::now());
        *self.stats.write() = TransportStats::default();
        Ok(())
    }

    fn record_rx(&self, bytes: &Bytes) {
        if !bytes.is_empty() {
            let mut stats = self.stats.write();
            stats.bytes_received += bytes.len() as u64;
            stats.packets_received += 1;
        }
    }

    fn record_error(&self) {
        self.stats.write().errors += 1;
    }
}

fn join_error(e: tokio::task::JoinError) -> TransportError {
    TransportError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
}

fn read_with_timeout(
    port: &SharedPort,
    wait: Duration,
) -> Result<Bytes, TransportError> {
    let mut guard = port.lock();
    let port = guard.as_mut().ok_or(TransportError::Disconnected)?;

    // A zero timeout means "block forever" on some platforms
    port.set_timeout(wait.max(Duration::from_millis(1)))
        .map_err(|e| TransportError::Io(e.into()))?;

    let mut buffer = vec![0u8; READ_CHUNK];
    match port.read(&mut buffer) {
        Ok(n) => {
            buffer.truncate(n);
            Ok(Bytes::from(buffer))
        }
        Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Bytes::new()),
        Err(e) => Err(TransportError::Io(e)),
    }
}

#[async_trait]
impl TransportTrait for SerialTransport {
    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let port = self.port.clone();
        let payload = data.to_vec();
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = port.lock();
            let port = guard.as_mut().ok_or(TransportError::Disconnected)?;
            port.write_all(&payload)?;
            port.flush()?;
            Ok::<usize, TransportError>(payload.len())
        })
        .await
        .map_err(join_error)?;

        match result {
            Ok(written) => {
                let mut stats = self.stats.write();
                stats.bytes_sent += written as u64;
                stats.packets_sent += 1;
                Ok(written)
            }
            Err(e) => {
                self.record_error();
                Err(e)
            }
        }
    }

    async fn receive(&mut self, wait: Duration) -> Result<Bytes, TransportError> {
        let port = self.port.clone();
        let result = tokio::task::spawn_blocking(move || read_with_timeout(&port, wait))
            .await
            .map_err(join_error)?;

        match result {
            Ok(bytes) => {
                self.record_rx(&bytes);
                Ok(bytes)
            }
            Err(e) => {
                self.record_error();
                Err(e)
            }
        }
    }

    async fn try_receive(&mut self) -> Result<Bytes, TransportError> {
        let port = self.port.clone();
        let result = tokio::task::spawn_blocking(move || {
            let pending = {
                let mut guard = port.lock();
                let handle = guard.as_mut().ok_or(TransportError::Disconnected)?;
                handle
                    .bytes_to_read()
                    .map_err(|e| TransportError::Io(e.into()))?
            };
            if pending == 0 {
                return Ok(Bytes::new());
            }
            read_with_timeout(&port, Duration::from_millis(1))
        })
        .await
        .map_err(join_error)?;

        if let Ok(ref bytes) = result {
            self.record_rx(bytes);
        }
        result
    }

    async fn probe(&mut self) -> Result<(), TransportError> {
        let mut guard = self.port.lock();
        let port = guard.as_mut().ok_or(TransportError::NotConnected)?;
        port.bytes_to_read().map(|_| ()).map_err(|e| {
            debug!("Serial probe on {} failed: {}", self.config.port, e);
            TransportError::Disconnected
        })
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(port) = self.port.lock().take() {
            // Drop whatever the device queued so the next open starts clean
            port.clear(ClearBuffer::All).ok();
        }
        self.connected_at = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.lock().is_some()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn connection_info(&self) -> String {
        format!("{} @ {} baud (8N1)", self.config.port, self.config.baud_rate)
    }

    fn stats(&self) -> TransportStats {
        let mut stats = self.stats.read().clone();
        if let Some(connected_at) = self.connected_at {
            stats.uptime_secs = connected_at.elapsed().as_secs();
        }
        stats
    }
}

/// A serial port visible to the OS
#[derive(Debug, Clone, Serialize)]
pub struct PortDescription {
    /// Device path or COM name
    pub device: String,
    /// Human readable description
    pub description: String,
    /// Hardware id (USB VID:PID and serial number when known)
    pub hwid: String,
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<PortDescription>, TransportError> {
    let ports = serialport::available_ports().map_err(|e| TransportError::Io(e.into()))?;

    Ok(ports
        .into_iter()
        .map(|info| {
            let (description, hwid) = match info.port_type {
                SerialPortType::UsbPort(usb) => (
                    usb.product.unwrap_or_else(|| "USB Serial".to_string()),
                    format!(
                        "USB VID:PID={:04X}:{:04X}{}",
                        usb.vid,
                        usb.pid,
                        usb.serial_number
                            .map(|s| format!(" SER={}", s))
                            .unwrap_or_default()
                    ),
                ),
                SerialPortType::PciPort => ("PCI Serial".to_string(), "PCI".to_string()),
                SerialPortType::BluetoothPort => {
                    ("Bluetooth Serial".to_string(), "BTH".to_string())
                }
                SerialPortType::Unknown => ("n/a".to_string(), "n/a".to_string()),
            };
            PortDescription {
                device: info.port_name,
                description,
                hwid,
            }
        })
        .collect())
}
