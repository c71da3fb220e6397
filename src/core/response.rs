//! Response results and lossy text decoding

use super::transport::TransportKind;
use serde::{Serialize, Serializer};
use std::time::Duration;

/// Outcome of one exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// Completion was detected
    Success,
    /// The budget ran out first; the text is whatever arrived
    Timeout,
    /// The transport failed; no text is kept
    Error,
}

/// Raw response of one exchange, handed to decoders as-is
#[derive(Debug, Clone, Serialize)]
pub struct ResponseResult {
    /// Outcome
    pub status: ResponseStatus,
    /// Command that was sent (empty when only listening)
    pub command: String,
    /// Decoded response text
    pub text: String,
    /// Time from the start of the call until the result was produced
    #[serde(rename = "elapsed_secs", serialize_with = "as_secs")]
    pub elapsed: Duration,
    /// Transport the exchange ran on
    pub transport: TransportKind,
    /// Records counted by an idle-after-matches policy
    pub matches: usize,
    /// Transport error message for [`ResponseStatus::Error`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The error proved the peer is gone
    #[serde(skip)]
    pub peer_lost: bool,
}

fn as_secs<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64((elapsed.as_secs_f64() * 1000.0).round() / 1000.0)
}

impl ResponseResult {
    /// Whether completion was detected
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// Whether the budget ran out
    pub fn is_timeout(&self) -> bool {
        self.status == ResponseStatus::Timeout
    }
}

/// Incremental UTF-8 decoder that drops invalid sequences.
///
/// A multi-byte character split across two reads is kept back until its
/// tail arrives instead of being dropped.
#[derive(Debug, Default)]
pub struct TextDecoder {
    pending: Vec<u8>,
}

impl TextDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `chunk`, appending valid text to `out`
    pub fn push(&mut self, chunk: &[u8], out: &mut String) {
        self.pending.extend_from_slice(chunk);

        let mut rest: &[u8] = &self.pending;
        let consumed = loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break self.pending.len();
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // valid_up_to guarantees this prefix is UTF-8
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(bad) => rest = &after[bad..],
                        // Incomplete sequence at the end; wait for more bytes
                        None => break self.pending.len() - after.len(),
                    }
                }
            }
        };

        self.pending.drain(..consumed);
    }
}
