//! Response collector
//!
//! Writes one command and accumulates the device's reply until the
//! completion policy is satisfied or the time budget runs out.
//!
//! The sequence for every exchange is:
//! 1. drain bytes left over from an earlier exchange
//! 2. write the CR-LF terminated command
//! 3. read in bounded slices, decode, append, re-evaluate the policy
//!    against the whole buffer
//!
//! Time is taken from `tokio::time::Instant`, which is monotonic.

use super::command::Command;
use super::policy::{CompletionPolicy, PolicyState, Progress};
use super::response::{ResponseResult, ResponseStatus, TextDecoder};
use super::transcript::{Direction, Transcript, TranscriptEntry};
use super::transport::{TransportError, TransportKind, TransportTrait};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Maximum number of non-blocking reads spent draining stale bytes
pub const DRAIN_LIMIT: usize = 64;

/// Framing engine
#[derive(Clone, Default)]
pub struct ResponseCollector {
    transcript: Option<Transcript>,
}

impl ResponseCollector {
    /// Create a collector without a transcript
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every exchange to `transcript`
    #[must_use]
    pub fn with_transcript(mut self, transcript: Transcript) -> Self {
        self.transcript = Some(transcript);
        self
    }

    /// Send `command` and collect the reply under `policy` within `timeout`
    pub async fn send_and_collect(
        &self,
        transport: &mut dyn TransportTrait,
        command: &Command,
        policy: &CompletionPolicy,
        timeout: Duration,
    ) -> ResponseResult {
        let started = Instant::now();
        let kind = transport.kind();
        let mut exchange = Exchange::new(kind, command.as_str());

        if let Err(e) = self.drain(transport).await {
            return exchange.failed(e, started);
        }

        let line = command.line();
        debug!("TX [{}] {:?} ({})", kind, command.as_str(), policy.label());
        if let Err(e) = transport.send(line.as_bytes()).await {
            return exchange.failed(e, started);
        }
        self.record(Direction::Sent, kind, line.as_bytes());

        self.collect(transport, policy, timeout, started, exchange).await
    }

    /// Collect unsolicited output under `policy` without writing anything.
    ///
    /// Used to wait for device-side events (e.g. a recording that starts
    /// on its own). Stale bytes are dropped first like for a command.
    pub async fn listen(
        &self,
        transport: &mut dyn TransportTrait,
        policy: &CompletionPolicy,
        timeout: Duration,
    ) -> ResponseResult {
        let started = Instant::now();
        let kind = transport.kind();
        let exchange = Exchange::new(kind, "");

        if let Err(e) = self.drain(transport).await {
            return exchange.failed(e, started);
        }

        debug!("Listening on {} ({}) for {:?}", kind, policy.label(), timeout);
        self.collect(transport, policy, timeout, started, exchange).await
    }

    /// Read and discard whatever is already buffered on the transport
    async fn drain(&self, transport: &mut dyn TransportTrait) -> Result<usize, TransportError> {
        let mut discarded = 0;

        for _ in 0..DRAIN_LIMIT {
            let stale = transport.try_receive().await?;
            if stale.is_empty() {
                break;
            }
            discarded += stale.len();
        }

        if discarded > 0 {
            debug!("Discarded {} stale bytes on {}", discarded, transport.kind());
            self.record(
                Direction::Info,
                transport.kind(),
                format!("discarded {} stale bytes", discarded).as_bytes(),
            );
        }
        Ok(discarded)
    }

    async fn collect(
        &self,
        transport: &mut dyn TransportTrait,
        policy: &CompletionPolicy,
        timeout: Duration,
        started: Instant,
        mut exchange: Exchange,
    ) -> ResponseResult {
        let deadline = started + timeout;
        let poll = policy.poll_interval();
        let mut state = PolicyState::new(policy);

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }

            let mut wait = poll.min(deadline - now);
            if let Some(idle_at) = state.idle_deadline() {
                wait = wait.min(idle_at.saturating_duration_since(now));
            }

            match transport.receive(wait).await {
                Ok(chunk) if !chunk.is_empty() => {
                    debug!("RX [{}] {} bytes", exchange.kind, chunk.len());
                    self.record(Direction::Received, exchange.kind, &chunk);
                    exchange.push(&chunk);
                }
                Ok(_) => {}
                Err(e) => return exchange.failed(e, started),
            }

            match state.evaluate(&exchange.text, Instant::now()) {
                Progress::Pending => {}
                Progress::Complete => {
                    return exchange.finish(ResponseStatus::Success, policy, &state, started);
                }
                Progress::Grace(grace) => {
                    let grace = grace.min(deadline.saturating_duration_since(Instant::now()));
                    if !grace.is_zero() {
                        match transport.receive(grace).await {
                            Ok(tail) => {
                                if !tail.is_empty() {
                                    self.record(Direction::Received, exchange.kind, &tail);
                                    exchange.push(&tail);
                                }
                            }
                            Err(e) => debug!("Grace read after end marker failed: {}", e),
                        }
                    }
                    return exchange.finish(ResponseStatus::Success, policy, &state, started);
                }
            }
        }

        if state.settled_at_timeout() {
            debug!(
                "Budget reached with {} records and no new one, treating as complete",
                state.matches()
            );
            return exchange.finish(ResponseStatus::Success, policy, &state, started);
        }

        warn!(
            "No completion ({}) on {} within {:?}; returning {} bytes of partial text",
            policy.label(),
            exchange.kind,
            timeout,
            exchange.text.len()
        );
        self.record(Direction::Info, exchange.kind, b"timeout");
        exchange.finish(ResponseStatus::Timeout, policy, &state, started)
    }

    fn record(&self, direction: Direction, kind: TransportKind, data: &[u8]) {
        if let Some(ref transcript) = self.transcript {
            transcript
                .lock()
                .record(&TranscriptEntry::new(direction, kind, data));
        }
    }
}

/// Accumulation state of one exchange
struct Exchange {
    kind: TransportKind,
    command: String,
    decoder: TextDecoder,
    text: String,
}

impl Exchange {
    fn new(kind: TransportKind, command: &str) -> Self {
        Self {
            kind,
            command: command.to_string(),
            decoder: TextDecoder::new(),
            text: String::new(),
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.decoder.push(chunk, &mut self.text);
    }

    fn finish(
        self,
        status: ResponseStatus,
        policy: &CompletionPolicy,
        state: &PolicyState<'_>,
        started: Instant,
    ) -> ResponseResult {
        let text = match status {
            ResponseStatus::Success => policy.finish(self.text),
            _ => self.text,
        };

        ResponseResult {
            status,
            command: self.command,
            text,
            elapsed: started.elapsed(),
            transport: self.kind,
            matches: state.matches(),
            error: None,
            peer_lost: false,
        }
    }

    fn failed(self, error: TransportError, started: Instant) -> ResponseResult {
        warn!("Transport error on {}: {}", self.kind, error);

        ResponseResult {
            status: ResponseStatus::Error,
            command: self.command,
            text: String::new(),
            elapsed: started.elapsed(),
            transport: self.kind,
            matches: 0,
            peer_lost: error.is_fatal(),
            error: Some(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::Pattern;
    use crate::core::simulator::SimulatedDevice;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_in_two_reads() {
        let mut device = SimulatedDevice::serial()
            .on_command("AT", vec![(ms(10), "OK\r\n"), (ms(20), "#")]);

        let result = ResponseCollector::new()
            .send_and_collect(&mut device, &Command::new("AT"), &CompletionPolicy::prompt(), ms(2000))
            .await;

        assert_eq!(result.status, ResponseStatus::Success);
        assert_eq!(result.text, "OK");
        assert_eq!(result.transport, TransportKind::Serial);
        assert_eq!(device.written(), vec!["AT\r\n".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pattern_split_across_reads() {
        let mut device = SimulatedDevice::tcp()
            .on_command("SNAP=SNAPS", vec![(ms(50), "capture_snap"), (ms(300), "shot_cb ok\r\n")]);
        let policy = CompletionPolicy::wait_for(Pattern::literal("capture_snapshot_cb"));

        let result = ResponseCollector::new()
            .send_and_collect(&mut device, &Command::new("SNAP=SNAPS"), &policy, ms(5000))
            .await;

        assert!(result.is_success());
        assert_eq!(result.text, "capture_snapshot_cb ok\r\n");
        assert!(result.elapsed < ms(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_partial_text() {
        let mut device = SimulatedDevice::serial()
            .on_command("ATW?", vec![(ms(100), "SSID => home\r\n")]);

        let result = ResponseCollector::new()
            .send_and_collect(&mut device, &Command::new("ATW?"), &CompletionPolicy::prompt(), ms(2000))
            .await;

        assert_eq!(result.status, ResponseStatus::Timeout);
        assert_eq!(result.text, "SSID => home\r\n");
        assert!(result.elapsed >= ms(2000));
        assert!(result.elapsed <= ms(2000) + CompletionPolicy::prompt().poll_interval());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_bytes_not_attributed() {
        let mut device = SimulatedDevice::serial()
            .on_command("AT+HEMS_ID", vec![(ms(10), "RTL8721DM\r\n#")]);
        device.inject_now("tail of previous reply\r\n#");

        let result = ResponseCollector::new()
            .send_and_collect(
                &mut device,
                &Command::new("AT+HEMS_ID"),
                &CompletionPolicy::prompt(),
                ms(2000),
            )
            .await;

        assert!(result.is_success());
        assert_eq!(result.text, "RTL8721DM");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_discards_text() {
        let mut device = SimulatedDevice::tcp()
            .on_command("ATWS", vec![(ms(10), "_SCAN_\n1\tA\n")])
            .disconnect_after(ms(200));

        let result = ResponseCollector::new()
            .send_and_collect(
                &mut device,
                &Command::new("ATWS"),
                &CompletionPolicy::idle_after_records(ms(1500)),
                ms(15000),
            )
            .await;

        assert_eq!(result.status, ResponseStatus::Error);
        assert!(result.text.is_empty());
        assert!(result.peer_lost);
        assert!(result.error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_listen_waits_for_unsolicited_output() {
        let mut device = SimulatedDevice::serial()
            .unsolicited(vec![(ms(4000), "[KVS] Fragment 1\r\n"), (ms(9000), "KVS START 30s recording\r\n")]);
        let policy = CompletionPolicy::wait_for(Pattern::ignore_case("kvs start 30s recording"));

        let result = ResponseCollector::new().listen(&mut device, &policy, ms(180_000)).await;

        assert!(result.is_success());
        assert!(result.command.is_empty());
        assert!(result.elapsed >= ms(9000) && result.elapsed < ms(10_000));
        assert!(device.written().is_empty());
    }
}
