//! Exchange transcript
//!
//! Optional record of every command written and every chunk read, kept in
//! a file as plain text or JSON lines.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

use super::transport::TransportKind;

/// Shared handle to a transcript
pub type Transcript = Arc<Mutex<TranscriptWriter>>;

/// Transcript file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptFormat {
    /// `[timestamp] TX serial AT` lines
    #[default]
    Text,
    /// One JSON object per line
    JsonLines,
}

/// Data direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Bytes read from the device
    Received,
    /// Bytes written to the device
    Sent,
    /// Engine annotation (drained bytes, timeouts)
    Info,
}

impl Direction {
    fn tag(self) -> &'static str {
        match self {
            Self::Received => "RX",
            Self::Sent => "TX",
            Self::Info => "##",
        }
    }
}

/// A single transcript entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Local wall-clock time
    pub timestamp: DateTime<Local>,
    /// Direction
    pub direction: Direction,
    /// Transport the bytes travelled on
    pub transport: TransportKind,
    /// Lossily decoded text
    pub text: String,
}

impl TranscriptEntry {
    /// Create new entry stamped with the current time
    pub fn new(direction: Direction, transport: TransportKind, data: &[u8]) -> Self {
        Self {
            timestamp: Local::now(),
            direction,
            transport,
            text: String::from_utf8_lossy(data).into_owned(),
        }
    }

    /// Format as a text line
    pub fn to_text(&self) -> String {
        format!(
            "[{}] {} {} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.direction.tag(),
            self.transport,
            self.text.escape_debug()
        )
    }

    /// Format as a JSON line
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Writes transcript entries to a file
pub struct TranscriptWriter {
    file: BufWriter<File>,
    format: TranscriptFormat,
    path: PathBuf,
    entries: usize,
}

impl TranscriptWriter {
    /// Open (append) a transcript file
    pub fn open(path: &Path, format: TranscriptFormat) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: BufWriter::new(file),
            format,
            path: path.to_path_buf(),
            entries: 0,
        })
    }

    /// Open a transcript and wrap it in a shared handle
    pub fn shared(path: &Path, format: TranscriptFormat) -> std::io::Result<Transcript> {
        Ok(Arc::new(Mutex::new(Self::open(path, format)?)))
    }

    /// Append an entry; write failures are logged, never propagated
    pub fn record(&mut self, entry: &TranscriptEntry) {
        let line = match self.format {
            TranscriptFormat::Text => entry.to_text(),
            TranscriptFormat::JsonLines => entry.to_json(),
        };
        if let Err(e) = writeln!(self.file, "{}", line).and_then(|()| self.file.flush()) {
            warn!("Failed to write transcript {}: {}", self.path.display(), e);
            return;
        }
        self.entries += 1;
    }

    /// Transcript path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries written so far
    pub fn entries(&self) -> usize {
        self.entries
    }
}
