//! Simulated Ameba device
//!
//! Scriptable transport for tests and dry runs. Rules match written
//! command lines and schedule reply chunks at offsets from the write.
//! Every read hands back at most one chunk, so a scripted reply arrives
//! split exactly the way it was written down.
//!
//! Timing uses the tokio clock, which makes the device deterministic
//! under `#[tokio::test(start_paused = true)]`.

use super::policy::Pattern;
use super::transport::{TransportError, TransportKind, TransportStats, TransportTrait};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Which written commands a rule reacts to
#[derive(Debug, Clone)]
pub enum MatchCondition {
    /// Command text equals the string (line terminator ignored)
    Exact(String),
    /// Command text contains the pattern
    Contains(Pattern),
    /// Any command
    Any,
}

impl MatchCondition {
    /// Check if a command line matches this condition
    pub fn matches(&self, command: &str) -> bool {
        match self {
            Self::Exact(text) => command == text,
            Self::Contains(pattern) => pattern.is_found(command),
            Self::Any => true,
        }
    }
}

/// Response rule
#[derive(Debug, Clone)]
pub struct ResponseRule {
    /// Match condition
    pub condition: MatchCondition,
    /// Reply chunks and their offset from the write
    pub chunks: Vec<(Duration, Bytes)>,
    /// Disable after first match
    pub one_shot: bool,
    /// Times the rule fired
    pub match_count: u64,
}

impl ResponseRule {
    /// Rule answering one exact command
    pub fn exact(command: &str, chunks: Vec<(Duration, &str)>) -> Self {
        Self {
            condition: MatchCondition::Exact(command.to_string()),
            chunks: to_chunks(chunks),
            one_shot: false,
            match_count: 0,
        }
    }

    /// Only answer the first matching command
    #[must_use]
    pub fn once(mut self) -> Self {
        self.one_shot = true;
        self
    }
}

fn to_chunks(chunks: Vec<(Duration, &str)>) -> Vec<(Duration, Bytes)> {
    chunks
        .into_iter()
        .map(|(at, text)| (at, Bytes::copy_from_slice(text.as_bytes())))
        .collect()
}

/// Shared view of a simulated device that stays usable after the device
/// was boxed and handed to a connection
#[derive(Debug, Clone, Default)]
pub struct DeviceMonitor {
    written: Arc<Mutex<Vec<String>>>,
    dead: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    probes: Arc<AtomicU64>,
}

impl DeviceMonitor {
    /// Command lines written so far, terminators included
    pub fn written(&self) -> Vec<String> {
        self.written.lock().clone()
    }

    /// Make the peer vanish; every further operation fails
    pub fn kill(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }

    /// Whether `disconnect` was called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of liveness probes received
    pub fn probes(&self) -> u64 {
        self.probes.load(Ordering::SeqCst)
    }
}

/// Virtual device speaking the Ameba console dialect
pub struct SimulatedDevice {
    kind: TransportKind,
    info: String,
    rules: Vec<ResponseRule>,
    created: Instant,
    /// Chunks scheduled for the future, ordered by due time
    scheduled: VecDeque<(Instant, Bytes)>,
    /// Chunks that are already waiting in the receive buffer
    buffered: VecDeque<Bytes>,
    dead_at: Option<Instant>,
    fail_writes: bool,
    monitor: DeviceMonitor,
    stats: TransportStats,
}

impl SimulatedDevice {
    /// Create a device reachable over the given transport kind
    pub fn new(kind: TransportKind) -> Self {
        let info = match kind {
            TransportKind::Serial => "SIM @ 115200 baud".to_string(),
            TransportKind::Tcp => "simulator:23".to_string(),
        };
        Self {
            kind,
            info,
            rules: Vec::new(),
            created: Instant::now(),
            scheduled: VecDeque::new(),
            buffered: VecDeque::new(),
            dead_at: None,
            fail_writes: false,
            monitor: DeviceMonitor::default(),
            stats: TransportStats::default(),
        }
    }

    /// Device on a serial link
    pub fn serial() -> Self {
        Self::new(TransportKind::Serial)
    }

    /// Device on a TCP link
    pub fn tcp() -> Self {
        Self::new(TransportKind::Tcp)
    }

    /// Device that answers the probe and the common query commands like
    /// a freshly booted board
    pub fn ameba(kind: TransportKind) -> Self {
        let ms = Duration::from_millis;
        Self::new(kind)
            .on_command("AT", vec![(ms(20), "\r\nOK\r\n"), (ms(30), "#")])
            .on_command("AT+HEMS_ID", vec![(ms(20), "HEMS ID: 0x3A7F\r\n#")])
            .on_command(
                "ATW?",
                vec![(ms(50), "AP: Home\r\nIP: 192.168.1.40\r\n"), (ms(80), "[ATW?]: _AT_WLAN_INFO_\r\n#")],
            )
    }

    /// Override the connection info string
    #[must_use]
    pub fn with_info(mut self, info: &str) -> Self {
        self.info = info.to_string();
        self
    }

    /// Reply to `command` with timed chunks
    #[must_use]
    pub fn on_command(self, command: &str, chunks: Vec<(Duration, &str)>) -> Self {
        self.with_rule(ResponseRule::exact(command, chunks))
    }

    /// Add a response rule; earlier rules win
    #[must_use]
    pub fn with_rule(mut self, rule: ResponseRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Emit chunks on its own, at offsets from device creation
    #[must_use]
    pub fn unsolicited(mut self, chunks: Vec<(Duration, &str)>) -> Self {
        let base = self.created;
        for (at, chunk) in to_chunks(chunks) {
            self.schedule(base + at, chunk);
        }
        self
    }

    /// Peer vanishes `after` device creation
    #[must_use]
    pub fn disconnect_after(mut self, after: Duration) -> Self {
        self.dead_at = Some(self.created + after);
        self
    }

    /// Every write fails with a broken pipe
    #[must_use]
    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// Put bytes into the receive buffer right away (stale output)
    pub fn inject_now(&mut self, text: &str) {
        self.inject_bytes(text.as_bytes());
    }

    /// Put raw bytes into the receive buffer right away
    pub fn inject_bytes(&mut self, data: &[u8]) {
        self.buffered.push_back(Bytes::copy_from_slice(data));
    }

    /// Shared view of the device
    pub fn monitor(&self) -> DeviceMonitor {
        self.monitor.clone()
    }

    /// Command lines written so far
    pub fn written(&self) -> Vec<String> {
        self.monitor.written()
    }

    /// Get all rules
    pub fn rules(&self) -> &[ResponseRule] {
        &self.rules
    }

    fn schedule(&mut self, due: Instant, chunk: Bytes) {
        let index = self.scheduled.partition_point(|(at, _)| *at <= due);
        self.scheduled.insert(index, (due, chunk));
    }

    fn check_alive(&self, now: Instant) -> Result<(), TransportError> {
        let dead = self.monitor.dead.load(Ordering::SeqCst)
            || self.dead_at.is_some_and(|at| now >= at);
        if dead {
            Err(TransportError::Disconnected)
        } else if self.monitor.closed.load(Ordering::SeqCst) {
            Err(TransportError::NotConnected)
        } else {
            Ok(())
        }
    }

    /// Move every chunk that is due by `now` into the receive buffer
    fn settle(&mut self, now: Instant) {
        while self.scheduled.front().is_some_and(|(at, _)| *at <= now) {
            if let Some((_, chunk)) = self.scheduled.pop_front() {
                self.buffered.push_back(chunk);
            }
        }
    }

    fn deliver(&mut self) -> Bytes {
        match self.buffered.pop_front() {
            Some(chunk) => {
                self.stats.bytes_received += chunk.len() as u64;
                self.stats.packets_received += 1;
                chunk
            }
            None => Bytes::new(),
        }
    }
}

#[async_trait]
impl TransportTrait for SimulatedDevice {
    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let now = Instant::now();
        self.check_alive(now)?;
        if self.fail_writes {
            self.stats.errors += 1;
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "simulated write failure",
            )));
        }

        let line = String::from_utf8_lossy(data).into_owned();
        let command = line.trim_end_matches(['\r', '\n']).to_string();
        self.monitor.written.lock().push(line);
        self.stats.bytes_sent += data.len() as u64;
        self.stats.packets_sent += 1;

        let mut replies = Vec::new();
        for rule in self.rules.iter_mut() {
            if rule.one_shot && rule.match_count > 0 {
                continue;
            }
            if rule.condition.matches(&command) {
                rule.match_count += 1;
                replies = rule.chunks.clone();
                break;
            }
        }
        for (offset, chunk) in replies {
            self.schedule(now + offset, chunk);
        }

        Ok(data.len())
    }

    async fn receive(&mut self, wait: Duration) -> Result<Bytes, TransportError> {
        let now = Instant::now();
        self.check_alive(now)?;
        self.settle(now);
        if !self.buffered.is_empty() {
            return Ok(self.deliver());
        }

        let until = now + wait;
        let next_chunk = self.scheduled.front().map(|(at, _)| *at).filter(|at| *at <= until);
        let death = self.dead_at.filter(|at| *at <= until);

        match (next_chunk, death) {
            (Some(at), Some(dead)) if dead <= at => {
                tokio::time::sleep_until(dead).await;
                Err(TransportError::Disconnected)
            }
            (None, Some(dead)) => {
                tokio::time::sleep_until(dead).await;
                Err(TransportError::Disconnected)
            }
            (Some(at), _) => {
                tokio::time::sleep_until(at).await;
                self.settle(at);
                Ok(self.deliver())
            }
            (None, None) => {
                tokio::time::sleep_until(until).await;
                Ok(Bytes::new())
            }
        }
    }

    async fn try_receive(&mut self) -> Result<Bytes, TransportError> {
        let now = Instant::now();
        self.check_alive(now)?;
        self.settle(now);
        Ok(self.deliver())
    }

    async fn probe(&mut self) -> Result<(), TransportError> {
        self.monitor.probes.fetch_add(1, Ordering::SeqCst);
        self.check_alive(Instant::now())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.monitor.closed.store(true, Ordering::SeqCst);
        self.scheduled.clear();
        self.buffered.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.check_alive(Instant::now()).is_ok()
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn connection_info(&self) -> String {
        self.info.clone()
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
