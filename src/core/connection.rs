//! Connection state
//!
//! Holds at most one serial and at most one TCP link at a time. Each link
//! sits behind its own exclusive guard so a transport is never driven by
//! two exchanges at once, while the serial and TCP links stay usable
//! independently.
//!
//! Links are removed on explicit close and whenever an exchange or a
//! liveness check proves the peer is gone.

use super::collector::ResponseCollector;
use super::command::Command;
use super::commands::{CommandSpec, Exchange};
use super::policy::CompletionPolicy;
use super::response::{ResponseResult, ResponseStatus};
use super::transcript::Transcript;
use super::transport::{
    Endpoint, SerialConfig, SerialTransport, TcpConfig, TcpTransport, TelnetPreamble,
    TransportError, TransportKind, TransportTrait, TELNET_PORT,
};
use parking_lot::Mutex as SyncMutex;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Transport behind its per-link exclusive guard
pub type SharedTransport = Arc<Mutex<Box<dyn TransportTrait>>>;

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The requested transport is not open
    #[error("Not connected via {0}")]
    NotConnected(TransportKind),

    /// Neither transport is open
    #[error("No active connection")]
    NoTransportAvailable,

    /// The command may only run over the serial link
    #[error("{0} is only available via serial connection")]
    SerialRequired(String),

    /// Device output is only watched while no TCP link is open
    #[error("{0} is only available via serial connection while no TCP link is open")]
    TcpLinkOpen(String),

    /// Re-arming without an earlier arm on this connection state
    #[error("No previous objects to reactivate, run kvs_arm first")]
    NothingToRearm,

    /// The transport failed while probing a freshly opened link
    #[error("Probe failed: {0}")]
    ProbeFailed(String),

    /// Transport error
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Parameters used when opening links
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSettings {
    /// TCP connect budget
    pub connect_timeout: Duration,
    /// Budget for the probe reply after opening
    pub probe_timeout: Duration,
    /// Wait before draining the Telnet preamble
    pub telnet_grace: Duration,
    /// TCP port whose console opens with Telnet negotiation
    pub telnet_port: u16,
    /// Command sent right after opening
    pub probe_command: String,
    /// Console prompt character
    pub prompt: char,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(2),
            telnet_grace: TelnetPreamble::default().grace(),
            telnet_port: TELNET_PORT,
            probe_command: "AT".to_string(),
            prompt: super::policy::DEFAULT_PROMPT,
        }
    }
}

/// An open link
#[derive(Clone)]
pub struct Link {
    /// What the link was opened with
    pub endpoint: Endpoint,
    /// The transport itself
    pub transport: SharedTransport,
}

impl Link {
    fn new(endpoint: Endpoint, transport: Box<dyn TransportTrait>) -> Self {
        Self {
            endpoint,
            transport: Arc::new(Mutex::new(transport)),
        }
    }

    /// Transport kind of this link
    pub fn kind(&self) -> TransportKind {
        self.endpoint.kind()
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link").field("endpoint", &self.endpoint).finish()
    }
}

/// Result of an open request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OpenOutcome {
    /// Link opened; the probe reply is kept for diagnostics
    Connected {
        /// Endpoint now open
        endpoint: Endpoint,
        /// Text the device answered the probe with, if any
        probe_reply: Option<String>,
    },
    /// A link of that kind was already open and was left untouched
    AlreadyConnected {
        /// Endpoint of the existing link
        endpoint: Endpoint,
    },
}

impl fmt::Display for OpenOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected { endpoint, probe_reply: Some(reply) } => {
                write!(f, "Connected to {}: {}", endpoint, reply)
            }
            Self::Connected { endpoint, probe_reply: None } => {
                write!(f, "Connected to {} (no initial response)", endpoint)
            }
            Self::AlreadyConnected { endpoint } => write!(f, "Already connected to {}", endpoint),
        }
    }
}

/// Which links to close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseTarget {
    /// Serial link only
    Serial,
    /// TCP link only
    Tcp,
    /// Both links
    All,
}

impl CloseTarget {
    fn includes(self, kind: TransportKind) -> bool {
        match self {
            Self::Serial => kind == TransportKind::Serial,
            Self::Tcp => kind == TransportKind::Tcp,
            Self::All => true,
        }
    }
}

impl FromStr for CloseTarget {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(Self::All),
            other => Ok(match other.parse::<TransportKind>()? {
                TransportKind::Serial => Self::Serial,
                TransportKind::Tcp => Self::Tcp,
            }),
        }
    }
}

/// Outcome of closing one link
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseOutcome {
    /// The link was open and is now closed
    Disconnected,
    /// Nothing was open
    NotConnected,
    /// Closing failed; the slot is cleared anyway
    Error(String),
}

impl fmt::Display for CloseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::NotConnected => write!(f, "not_connected"),
            Self::Error(e) => write!(f, "error: {}", e),
        }
    }
}

/// Per-target outcome of a close request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CloseReport {
    /// Serial outcome, when the serial link was targeted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<CloseOutcome>,
    /// TCP outcome, when the TCP link was targeted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp: Option<CloseOutcome>,
}

/// State of one slot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SlotStatus {
    /// Whether a live link occupies the slot
    pub connected: bool,
    /// Endpoint of the link
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Endpoint>,
}

/// Snapshot of both slots
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// Serial slot
    pub serial: SlotStatus,
    /// TCP slot
    pub tcp: SlotStatus,
    /// Human-readable one-liner
    pub summary: String,
}

impl StatusReport {
    fn new(serial: SlotStatus, tcp: SlotStatus) -> Self {
        let mut parts = Vec::new();
        if let Some(Endpoint::Serial { port, .. }) = &serial.endpoint {
            parts.push(format!("Serial ({})", port));
        }
        if let Some(endpoint @ Endpoint::Tcp { .. }) = &tcp.endpoint {
            parts.push(format!("TCP ({})", endpoint));
        }
        let summary = if parts.is_empty() {
            "No connections".to_string()
        } else {
            format!("Connected: {}", parts.join(", "))
        };

        Self { serial, tcp, summary }
    }
}

/// Owner of the serial and TCP links
pub struct ConnectionState {
    serial: Mutex<Option<Link>>,
    tcp: Mutex<Option<Link>>,
    settings: LinkSettings,
    collector: ResponseCollector,
    /// Last KVS arm command, replayed by re-arming
    kvs_armed: SyncMutex<Option<Command>>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new(LinkSettings::default())
    }
}

impl ConnectionState {
    /// Create an empty connection state
    pub fn new(settings: LinkSettings) -> Self {
        Self {
            serial: Mutex::new(None),
            tcp: Mutex::new(None),
            settings,
            collector: ResponseCollector::new(),
            kvs_armed: SyncMutex::new(None),
        }
    }

    /// Record every exchange to `transcript`
    #[must_use]
    pub fn with_transcript(mut self, transcript: Transcript) -> Self {
        self.collector = self.collector.with_transcript(transcript);
        self
    }

    /// Settings in use
    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    fn slot(&self, kind: TransportKind) -> &Mutex<Option<Link>> {
        match kind {
            TransportKind::Serial => &self.serial,
            TransportKind::Tcp => &self.tcp,
        }
    }

    /// Open the serial link
    pub async fn open_serial(&self, port: &str, baud: u32) -> Result<OpenOutcome, ConnectionError> {
        if let Some(endpoint) = self.endpoint(TransportKind::Serial).await {
            return Ok(OpenOutcome::AlreadyConnected { endpoint });
        }

        let mut transport = SerialTransport::new(SerialConfig::new(port, baud));
        transport.connect().await?;

        let endpoint = Endpoint::Serial { port: port.to_string(), baud };
        self.install(endpoint, Box::new(transport)).await
    }

    /// Open the TCP link; the Telnet preamble is drained on the Telnet port
    pub async fn open_tcp(&self, host: &str, port: u16) -> Result<OpenOutcome, ConnectionError> {
        if let Some(endpoint) = self.endpoint(TransportKind::Tcp).await {
            return Ok(OpenOutcome::AlreadyConnected { endpoint });
        }

        let config = TcpConfig::new(host, port).connect_timeout(self.settings.connect_timeout);
        let mut transport = TcpTransport::new(config);
        transport.connect().await?;

        let endpoint = Endpoint::Tcp { host: host.to_string(), port };
        self.install(endpoint, Box::new(transport)).await
    }

    /// Install an already opened transport into the slot of its kind.
    ///
    /// Goes through the same preamble and probe steps as the `open_*`
    /// methods.
    pub async fn attach(
        &self,
        endpoint: Endpoint,
        transport: Box<dyn TransportTrait>,
    ) -> Result<OpenOutcome, ConnectionError> {
        if let Some(existing) = self.endpoint(endpoint.kind()).await {
            return Ok(OpenOutcome::AlreadyConnected { endpoint: existing });
        }
        self.install(endpoint, transport).await
    }

    /// Preamble and probe run without holding the slot; the slot is only
    /// locked to store the finished link.
    async fn install(
        &self,
        endpoint: Endpoint,
        mut transport: Box<dyn TransportTrait>,
    ) -> Result<OpenOutcome, ConnectionError> {
        if matches!(endpoint, Endpoint::Tcp { port, .. } if port == self.settings.telnet_port) {
            TelnetPreamble::new(self.settings.telnet_grace)
                .run(transport.as_mut())
                .await;
        }

        let probe = self
            .collector
            .send_and_collect(
                transport.as_mut(),
                &Command::new(self.settings.probe_command.as_str()),
                &CompletionPolicy::PromptSuffix { prompt: self.settings.prompt },
                self.settings.probe_timeout,
            )
            .await;

        if probe.status == ResponseStatus::Error {
            if let Err(e) = transport.disconnect().await {
                debug!("Disconnect after failed probe: {}", e);
            }
            return Err(ConnectionError::ProbeFailed(probe.error.unwrap_or_default()));
        }

        let reply = probe.text.trim();
        let probe_reply = (!reply.is_empty()).then(|| reply.to_string());
        if probe.is_timeout() {
            debug!("No prompt from {} within {:?}", endpoint, self.settings.probe_timeout);
        }

        let mut slot = self.slot(endpoint.kind()).lock().await;
        if let Some(existing) = slot.as_ref() {
            // Another open won the race while this one was probing
            let existing = existing.endpoint.clone();
            drop(slot);
            if let Err(e) = transport.disconnect().await {
                debug!("Disconnect of duplicate {} link: {}", endpoint, e);
            }
            return Ok(OpenOutcome::AlreadyConnected { endpoint: existing });
        }

        info!("Connected to {}", endpoint);
        *slot = Some(Link::new(endpoint.clone(), transport));
        Ok(OpenOutcome::Connected { endpoint, probe_reply })
    }

    /// Close the targeted links. Closing a link that is not open reports
    /// [`CloseOutcome::NotConnected`]; this never fails.
    pub async fn close(&self, target: CloseTarget) -> CloseReport {
        let mut report = CloseReport::default();

        for kind in [TransportKind::Serial, TransportKind::Tcp] {
            if !target.includes(kind) {
                continue;
            }

            let link = self.slot(kind).lock().await.take();
            let outcome = match link {
                None => CloseOutcome::NotConnected,
                Some(link) => match link.transport.lock().await.disconnect().await {
                    Ok(()) => {
                        info!("Disconnected from {}", link.endpoint);
                        CloseOutcome::Disconnected
                    }
                    Err(e) => {
                        warn!("Error closing {}: {}", link.endpoint, e);
                        CloseOutcome::Error(e.to_string())
                    }
                },
            };

            match kind {
                TransportKind::Serial => report.serial = Some(outcome),
                TransportKind::Tcp => report.tcp = Some(outcome),
            }
        }

        report
    }

    /// Report both slots. The TCP link is probed on every call and dropped
    /// when the peer is gone.
    pub async fn status(&self) -> StatusReport {
        let serial = {
            let slot = self.serial.lock().await;
            match slot.as_ref() {
                Some(link) => {
                    let connected = match link.transport.try_lock() {
                        Ok(transport) => transport.is_connected(),
                        Err(_) => true,
                    };
                    SlotStatus { connected, endpoint: Some(link.endpoint.clone()) }
                }
                None => SlotStatus::default(),
            }
        };

        let tcp = {
            let mut slot = self.tcp.lock().await;
            let alive = match slot.as_ref() {
                Some(link) => match link.transport.try_lock() {
                    Ok(mut transport) => match transport.probe().await {
                        Ok(()) => true,
                        Err(e) => {
                            warn!("TCP link to {} is gone ({}), clearing it", link.endpoint, e);
                            false
                        }
                    },
                    // An exchange is running on it right now
                    Err(_) => true,
                },
                None => false,
            };

            if alive {
                SlotStatus { connected: true, endpoint: slot.as_ref().map(|l| l.endpoint.clone()) }
            } else {
                *slot = None;
                SlotStatus::default()
            }
        };

        StatusReport::new(serial, tcp)
    }

    /// Endpoint of the open link of `kind`
    pub async fn endpoint(&self, kind: TransportKind) -> Option<Endpoint> {
        self.slot(kind).lock().await.as_ref().map(|l| l.endpoint.clone())
    }

    /// Pick the link for an exchange: the explicit kind if given, otherwise
    /// serial when open, then TCP.
    pub async fn select_transport(&self, explicit: Option<TransportKind>) -> Result<Link, ConnectionError> {
        if let Some(kind) = explicit {
            return self
                .slot(kind)
                .lock()
                .await
                .clone()
                .ok_or(ConnectionError::NotConnected(kind));
        }

        if let Some(link) = self.serial.lock().await.clone() {
            return Ok(link);
        }
        self.tcp.lock().await.clone().ok_or(ConnectionError::NoTransportAvailable)
    }

    /// Send `command` on the selected link and collect its reply
    pub async fn execute(
        &self,
        via: Option<TransportKind>,
        command: &Command,
        policy: &CompletionPolicy,
        timeout: Duration,
    ) -> Result<ResponseResult, ConnectionError> {
        let link = self.select_transport(via).await?;
        Ok(self.exchange(&link, Some(command), policy, timeout).await)
    }

    /// Collect unsolicited output on the selected link
    pub async fn listen(
        &self,
        via: Option<TransportKind>,
        policy: &CompletionPolicy,
        timeout: Duration,
    ) -> Result<ResponseResult, ConnectionError> {
        let link = self.select_transport(via).await?;
        Ok(self.exchange(&link, None, policy, timeout).await)
    }

    /// Run a catalog entry, honoring its serial-only restriction.
    ///
    /// Listeners are refused while a TCP link is open, and re-arming
    /// replays the last KVS arm command run on this state.
    pub async fn run(
        &self,
        spec: &CommandSpec,
        via: Option<TransportKind>,
    ) -> Result<ResponseResult, ConnectionError> {
        if spec.exchange == Exchange::Listen && self.tcp.lock().await.is_some() {
            return Err(ConnectionError::TcpLinkOpen(spec.name.to_string()));
        }

        let command = match &spec.exchange {
            Exchange::Send(command) => Some(command.clone()),
            Exchange::Arm(command) => {
                *self.kvs_armed.lock() = Some(command.clone());
                Some(command.clone())
            }
            Exchange::Rearm => {
                let armed = self.kvs_armed.lock().clone();
                Some(armed.ok_or(ConnectionError::NothingToRearm)?)
            }
            Exchange::Listen => None,
        };

        let link = if spec.serial_only {
            if via == Some(TransportKind::Tcp) {
                return Err(ConnectionError::SerialRequired(spec.name.to_string()));
            }
            self.serial
                .lock()
                .await
                .clone()
                .ok_or_else(|| ConnectionError::SerialRequired(spec.name.to_string()))?
        } else {
            self.select_transport(via).await?
        };

        Ok(self.exchange(&link, command.as_ref(), &spec.policy, spec.timeout).await)
    }

    async fn exchange(
        &self,
        link: &Link,
        command: Option<&Command>,
        policy: &CompletionPolicy,
        timeout: Duration,
    ) -> ResponseResult {
        let result = {
            let mut transport = link.transport.lock().await;
            match command {
                Some(command) => {
                    self.collector
                        .send_and_collect(transport.as_mut(), command, policy, timeout)
                        .await
                }
                None => self.collector.listen(transport.as_mut(), policy, timeout).await,
            }
        };

        if result.peer_lost {
            self.evict(link).await;
        }
        result
    }

    /// Drop `link` from its slot unless it was already replaced
    async fn evict(&self, link: &Link) {
        let mut slot = self.slot(link.kind()).lock().await;
        let same = slot
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(&current.transport, &link.transport));
        if same {
            warn!("Peer behind {} is gone, clearing the {} link", link.endpoint, link.kind());
            *slot = None;
        }
    }
}
