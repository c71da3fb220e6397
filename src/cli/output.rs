//! Result rendering
//!
//! Everything the binary prints goes through here, either as
//! human-readable text or as one JSON document per result.

use crate::core::connection::{CloseReport, OpenOutcome, StatusReport};
use crate::core::response::{ResponseResult, ResponseStatus};
use crate::core::transport::PortDescription;
use clap::ValueEnum;
use serde::Serialize;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON for scripting
    Json,
}

fn json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
}

/// Render one exchange
pub fn render_response(result: &ResponseResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => json(result),
        OutputFormat::Text => match result.status {
            ResponseStatus::Success => result.text.clone(),
            ResponseStatus::Timeout => {
                let mut out = format!(
                    "[timeout after {:.1}s on {}]",
                    result.elapsed.as_secs_f64(),
                    result.transport
                );
                if !result.text.is_empty() {
                    out.push('\n');
                    out.push_str(&escaped(&result.text));
                }
                out
            }
            ResponseStatus::Error => format!(
                "[error on {}] {}",
                result.transport,
                result.error.as_deref().unwrap_or("transport error")
            ),
        },
    }
}

/// Render the outcome of opening a link
pub fn render_open(outcome: &OpenOutcome, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => json(outcome),
        OutputFormat::Text => outcome.to_string(),
    }
}

/// Render a close report
pub fn render_close(report: &CloseReport, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => json(report),
        OutputFormat::Text => {
            let mut lines = Vec::new();
            if let Some(outcome) = &report.serial {
                lines.push(format!("serial: {}", outcome));
            }
            if let Some(outcome) = &report.tcp {
                lines.push(format!("tcp: {}", outcome));
            }
            lines.join("\n")
        }
    }
}

/// Render a status report
pub fn render_status(report: &StatusReport, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => json(report),
        OutputFormat::Text => report.summary.clone(),
    }
}

/// Render the serial port list
pub fn render_ports(ports: &[PortDescription], format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => json(&ports),
        OutputFormat::Text if ports.is_empty() => "No serial ports found".to_string(),
        OutputFormat::Text => ports
            .iter()
            .map(|p| format!("{:<16} {:<32} {}", p.device, p.description, p.hwid))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Show control characters of partial output instead of executing them
fn escaped(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\r' => "\\r".to_string(),
            '\n' => "\\n\n".to_string(),
            '\t' => "\t".to_string(),
            '\x1b' => "\\e".to_string(),
            c if c.is_control() => format!("\\x{:02x}", c as u32),
            c => c.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::{Endpoint, TransportKind};
    use std::time::Duration;

    fn result(status: ResponseStatus, text: &str) -> ResponseResult {
        ResponseResult {
            status,
            command: "ATW?".into(),
            text: text.into(),
            elapsed: Duration::from_millis(3000),
            transport: TransportKind::Tcp,
            matches: 0,
            error: (status == ResponseStatus::Error).then(|| "Disconnected".to_string()),
            peer_lost: false,
        }
    }

    #[test]
    fn test_text_rendering() {
        assert_eq!(render_response(&result(ResponseStatus::Success, "OK"), OutputFormat::Text), "OK");
        assert_eq!(
            render_response(&result(ResponseStatus::Timeout, "AP: x\r\n"), OutputFormat::Text),
            "[timeout after 3.0s on tcp]\nAP: x\\r\\n\n"
        );
        assert_eq!(
            render_response(&result(ResponseStatus::Error, ""), OutputFormat::Text),
            "[error on tcp] Disconnected"
        );
    }

    #[test]
    fn test_json_rendering() {
        let text = render_response(&result(ResponseStatus::Success, "OK"), OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["text"], "OK");

        let outcome = OpenOutcome::AlreadyConnected {
            endpoint: Endpoint::Serial { port: "COM3".into(), baud: 115200 },
        };
        let value: serde_json::Value = serde_json::from_str(&render_open(&outcome, OutputFormat::Json)).unwrap();
        assert_eq!(value["status"], "already_connected");
        assert_eq!(value["endpoint"]["port"], "COM3");
    }

    #[test]
    fn test_close_rendering() {
        let report = CloseReport {
            serial: Some(crate::core::connection::CloseOutcome::Disconnected),
            tcp: Some(crate::core::connection::CloseOutcome::NotConnected),
        };
        assert_eq!(render_close(&report, OutputFormat::Text), "serial: disconnected\ntcp: not_connected");
    }

    #[test]
    fn test_empty_port_list() {
        assert_eq!(render_ports(&[], OutputFormat::Text), "No serial ports found");
        assert_eq!(render_ports(&[], OutputFormat::Json), "[]");
    }
}
