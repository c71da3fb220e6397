//! Outgoing command lines

use std::fmt;

/// Line terminator the Ameba console expects
pub const LINE_TERMINATOR: &str = "\r\n";

/// A single command line.
///
/// Stateless; built per call and normalized to end in exactly one CR-LF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
}

impl Command {
    /// Create a command from user text
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Command text without any line terminator
    pub fn as_str(&self) -> &str {
        self.text.trim_end_matches(['\r', '\n'])
    }

    /// Wire form: the text followed by a single CR-LF
    pub fn line(&self) -> String {
        let mut line = self.as_str().to_string();
        line.push_str(LINE_TERMINATOR);
        line
    }

    /// Whether there is nothing but the terminator to send
    pub fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Command {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for Command {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}
