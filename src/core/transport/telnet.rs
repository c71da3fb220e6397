//! Telnet console preamble
//!
//! The board's Telnet console opens with RFC 854 option negotiation. The
//! negotiation is never answered; the bytes are drained once right after
//! connect so they do not end up in the first command's response.

use super::TransportTrait;
use std::time::Duration;
use tracing::debug;

/// Well-known Telnet port
pub const TELNET_PORT: u16 = 23;

// Telnet protocol constants
const IAC: u8 = 255; // Interpret As Command
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250; // Subnegotiation Begin

/// Outcome of a preamble drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreambleReport {
    /// Bytes read and thrown away
    pub bytes_discarded: usize,
    /// IAC negotiation commands seen among them
    pub negotiations: usize,
}

/// One-shot, best-effort drain of the Telnet negotiation preamble
#[derive(Debug, Clone, Copy)]
pub struct TelnetPreamble {
    grace: Duration,
}

impl Default for TelnetPreamble {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl TelnetPreamble {
    /// Create a preamble handler with the given grace period
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Grace period waited before the drain read
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Wait the grace period, do a single non-blocking read and discard it.
    ///
    /// Never fails: a read error only shows up in the debug log.
    pub async fn run(&self, transport: &mut dyn TransportTrait) -> PreambleReport {
        tokio::time::sleep(self.grace).await;

        match transport.try_receive().await {
            Ok(bytes) => {
                let report = PreambleReport {
                    bytes_discarded: bytes.len(),
                    negotiations: count_negotiations(&bytes),
                };
                debug!(
                    "Telnet preamble: discarded {} bytes ({} negotiation commands)",
                    report.bytes_discarded, report.negotiations
                );
                report
            }
            Err(e) => {
                debug!("Telnet preamble drain failed: {}", e);
                PreambleReport::default()
            }
        }
    }
}

/// Count IAC option commands (DO/DONT/WILL/WONT/SB) in a byte run
pub fn count_negotiations(data: &[u8]) -> usize {
    let mut count = 0;
    let mut i = 0;

    while i + 1 < data.len() {
        if data[i] == IAC {
            match data[i + 1] {
                DO | DONT | WILL | WONT => {
                    count += 1;
                    i += 3;
                    continue;
                }
                SB => {
                    count += 1;
                    i += 2;
                    continue;
                }
                IAC => {
                    // Escaped 0xFF data byte
                    i += 2;
                    continue;
                }
                _ => {}
            }
        }
        i += 1;
    }

    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_negotiations() {
        // IAC DO ECHO, IAC WILL SGA, IAC SB TTYPE ... IAC SE
        let data = [
            IAC, DO, 1, IAC, WILL, 3, IAC, SB, 24, 1, IAC, 240, b'h', b'i',
        ];
        assert_eq!(count_negotiations(&data), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preamble_discards_negotiation() {
        let mut device = crate::core::simulator::SimulatedDevice::tcp();
        device.inject_bytes(&[IAC, DO, 1, IAC, WILL, 3]);

        let report = TelnetPreamble::default().run(&mut device).await;
        assert_eq!(report.bytes_discarded, 6);
        assert_eq!(report.negotiations, 2);
        assert!(device.try_receive().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_preamble_bounded_by_grace() {
        let mut device = crate::core::simulator::SimulatedDevice::tcp();
        let preamble = TelnetPreamble::new(Duration::from_millis(250));

        let start = tokio::time::Instant::now();
        let report = preamble.run(&mut device).await;
        assert_eq!(start.elapsed(), preamble.grace());
        assert_eq!(report, PreambleReport::default());
    }

    #[test]
    fn test_plain_text_has_no_negotiations() {
        assert_eq!(count_negotiations(b"Welcome to Ameba\r\n#"), 0);
        assert_eq!(count_negotiations(&[IAC, IAC, b'x']), 0);
        assert_eq!(count_negotiations(&[IAC]), 0);
    }
}
