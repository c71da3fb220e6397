//! TCP transport implementation

use super::{TransportError, TransportKind, TransportStats, TransportTrait};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

const READ_CHUNK: usize = 8192;

/// TCP connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Connection timeout
    pub connect_timeout: Duration,
}

impl TcpConfig {
    /// Create a new TCP configuration
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Set connect timeout
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self::new("localhost", super::TELNET_PORT)
    }
}

/// TCP transport
pub struct TcpTransport {
    config: TcpConfig,
    stream: Option<TcpStream>,
    stats: Arc<RwLock<TransportStats>>,
    connected_at: Option<Instant>,
}

impl TcpTransport {
    /// Create a new (closed) TCP transport
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            stream: None,
            stats: Arc::new(RwLock::new(TransportStats::default())),
            connected_at: None,
        }
    }

    /// Connect to the peer, bounded by the configured timeout
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| TransportError::Timeout(self.config.connect_timeout.as_secs()))?
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", addr, e)))?;

        // Set TCP_NODELAY so short AT commands leave immediately
        stream.set_nodelay(true).map_err(TransportError::Io)?;

        self.stream = Some(stream);
        self.connected_at = Some(Instant::now());
        *self.stats.write() = TransportStats::default();

        Ok(())
    }

    fn stream(&mut self) -> Result<&mut TcpStream, TransportError> {
        self.stream.as_mut().ok_or(TransportError::Disconnected)
    }

    fn account(&self, result: &Result<Bytes, TransportError>) {
        let mut stats = self.stats.write();
        match result {
            Ok(bytes) if !bytes.is_empty() => {
                stats.bytes_received += bytes.len() as u64;
                stats.packets_received += 1;
            }
            Ok(_) => {}
            Err(_) => stats.errors += 1,
        }
    }
}

#[async_trait]
impl TransportTrait for TcpTransport {
    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let stream = self.stream()?;

        stream.write_all(data).await.map_err(TransportError::Io)?;
        stream.flush().await.map_err(TransportError::Io)?;

        let mut stats = self.stats.write();
        stats.bytes_sent += data.len() as u64;
        stats.packets_sent += 1;

        Ok(data.len())
    }

    async fn receive(&mut self, wait: Duration) -> Result<Bytes, TransportError> {
        let stream = self.stream()?;
        let mut buffer = vec![0u8; READ_CHUNK];

        let result = match tokio::time::timeout(wait, stream.read(&mut buffer)).await {
            Err(_elapsed) => Ok(Bytes::new()),
            Ok(Ok(0)) => Err(TransportError::Disconnected),
            Ok(Ok(n)) => {
                buffer.truncate(n);
                Ok(Bytes::from(buffer))
            }
            Ok(Err(e)) => Err(TransportError::Io(e)),
        };

        self.account(&result);
        result
    }

    async fn try_receive(&mut self) -> Result<Bytes, TransportError> {
        let stream = self.stream()?;
        let mut buffer = vec![0u8; READ_CHUNK];

        let result = match stream.try_read(&mut buffer) {
            Ok(0) => Err(TransportError::Disconnected),
            Ok(n) => {
                buffer.truncate(n);
                Ok(Bytes::from(buffer))
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(Bytes::new()),
            Err(e) => Err(TransportError::Io(e)),
        };

        self.account(&result);
        result
    }

    async fn probe(&mut self) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

        if let Some(e) = stream.take_error().map_err(TransportError::Io)? {
            debug!("Pending socket error on {}:{}: {}", self.config.host, self.config.port, e);
            return Err(TransportError::Disconnected);
        }

        // A zero-length write never touches the wire; a peek that resolves
        // immediately with 0 bytes is the reliable EOF signal.
        stream.write_all(&[]).await.map_err(TransportError::Io)?;
        let mut byte = [0u8; 1];
        match tokio::time::timeout(Duration::ZERO, stream.peek(&mut byte)).await {
            Ok(Ok(0)) => Err(TransportError::Disconnected),
            Ok(Ok(_)) | Err(_) => Ok(()),
            Ok(Err(e)) => Err(TransportError::Io(e)),
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await.ok();
        }
        self.connected_at = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn connection_info(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    fn stats(&self) -> TransportStats {
        let mut stats = self.stats.read().clone();
        if let Some(connected_at) = self.connected_at {
            stats.uptime_secs = connected_at.elapsed().as_secs();
        }
        stats
    }
}
