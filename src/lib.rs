//! # Ameba Link Core Library
//!
//! Command/response framing for Ameba boards that speak a textual AT
//! command dialect over a serial port or a TCP/Telnet console:
//! - Serial ports (USB-Serial adapters on the log UART)
//! - Raw TCP connections, with the Telnet preamble drained on port 23
//!
//! ## Features
//!
//! - One serial and one TCP link open at the same time, serial preferred
//! - Completion by prompt, by marker, by start/end markers, or by idle
//!   time after the last result record
//! - Stale-byte draining before every command
//! - Self-healing link state when a peer disappears
//! - Optional exchange transcripts
//! - CLI with exit codes
//!
//! ## Example
//!
//! ```rust,no_run
//! use ameba_link::{Command, CompletionPolicy, ConnectionState, LinkSettings};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let state = ConnectionState::new(LinkSettings::default());
//!     println!("{}", state.open_serial("COM3", 115200).await?);
//!
//!     let reply = state
//!         .execute(None, &Command::new("ATW?"), &CompletionPolicy::prompt(), Duration::from_secs(3))
//!         .await?;
//!     println!("{:?}: {}", reply.status, reply.text);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat};
pub use crate::config::{AppConfig, ConfigError};
pub use crate::core::collector::ResponseCollector;
pub use crate::core::command::Command;
pub use crate::core::commands::{CommandCatalog, CommandSpec, CommandTimings};
pub use crate::core::connection::{
    CloseOutcome, CloseReport, CloseTarget, ConnectionError, ConnectionState, LinkSettings,
    OpenOutcome, StatusReport,
};
pub use crate::core::policy::{CompletionPolicy, Pattern, RecordMatcher};
pub use crate::core::response::{ResponseResult, ResponseStatus};
pub use crate::core::transcript::{TranscriptFormat, TranscriptWriter};
pub use crate::core::transport::{
    Endpoint, SerialConfig, TcpConfig, TransportError, TransportKind, TransportTrait,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
