//! Core module containing the command/response framing engine
//!
//! This module provides:
//! - Transport layer for serial ports and TCP/Telnet sockets
//! - Completion policies deciding when a device reply is complete
//! - The response collector driving one exchange on one transport
//! - Connection state holding the serial and TCP links
//! - The catalog of console commands the firmware understands
//! - Exchange transcripts
//! - A simulated device for tests and dry runs

pub mod collector;
pub mod command;
pub mod commands;
pub mod connection;
pub mod policy;
pub mod response;
pub mod simulator;
pub mod transcript;
pub mod transport;
