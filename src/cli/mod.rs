//! CLI Module
//!
//! Provides command-line interface functionality including:
//! - Exit codes for automation
//! - Text and JSON rendering of results
//! - Line parsing for the interactive shell

pub mod exit_codes;
pub mod output;
pub mod shell;

pub use exit_codes::{classify, exit_code_description, print_exit_codes, CliResult, ExitCodes};
pub use output::{render_close, render_open, render_ports, render_response, render_status, OutputFormat};
pub use shell::ShellInput;
