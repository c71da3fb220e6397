//! Device command catalog
//!
//! Registry of the console commands the Ameba firmware understands, keyed
//! by name. Each entry knows the command text, how its reply ends, how long
//! it may take and whether it must go over the serial link.

use super::command::Command;
use super::policy::{CompletionPolicy, Pattern};
use std::time::Duration;
use thiserror::Error;

/// HEMS control plans accepted by `AT+HEMS_SETCTL`
pub const CONTROL_PLANS: [(&str, u8); 5] = [
    ("At Home", 0),
    ("Out of House", 1),
    ("Quick Cooling", 2),
    ("Quick Warmth", 3),
    ("Night Mode", 4),
];

/// Marker printed by the camera firmware when a snapshot was stored
pub const SNAPSHOT_MARKER: &str = "capture_snapshot_cb";

/// Marker printed when a KVS recording begins
pub const KVS_START_MARKER: &str = "kvs start 30s recording";

/// Marker printed when a KVS recording was uploaded
pub const KVS_DONE_MARKER: &str = "sending end of frames done!";

const NAMES: [&str; 20] = [
    "probe",
    "wifi_scan",
    "wifi_status",
    "wifi_set_ssid",
    "wifi_set_password",
    "wifi_join",
    "hems_identify",
    "hems_start_logging",
    "hems_stop_logging",
    "hems_download_logs",
    "hems_alerts",
    "hems_get_control_plan",
    "hems_set_control_plan",
    "hems_statistics",
    "snapshot",
    "kvs_arm",
    "kvs_reactivate",
    "kvs_wait_start",
    "kvs_wait_done",
    "raw",
];

/// Catalog errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// No command with that name
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Required argument not given
    #[error("{command} needs an argument: {argument}")]
    MissingArgument {
        /// Command name
        command: String,
        /// Argument description
        argument: &'static str,
    },

    /// Argument given but not acceptable
    #[error("Invalid argument for {command}: {reason}")]
    InvalidArgument {
        /// Command name
        command: String,
        /// What is wrong with it
        reason: String,
    },
}

/// Time budgets used by the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTimings {
    /// Short deterministic commands
    pub command: Duration,
    /// `ATW?` status query
    pub status: Duration,
    /// `ATWS` network scan
    pub scan: Duration,
    /// Idle threshold after the last scan record
    pub scan_idle: Duration,
    /// Snapshot capture
    pub snapshot: Duration,
    /// Waiting for a KVS recording to start
    pub kvs_start: Duration,
    /// Waiting for a KVS recording to finish uploading
    pub kvs_done: Duration,
}

impl Default for CommandTimings {
    fn default() -> Self {
        Self {
            command: Duration::from_secs(2),
            status: Duration::from_secs(3),
            scan: Duration::from_secs(15),
            scan_idle: Duration::from_millis(1500),
            snapshot: Duration::from_secs(10),
            kvs_start: Duration::from_secs(180),
            kvs_done: Duration::from_secs(60),
        }
    }
}

/// What the exchange does on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exchange {
    /// Write a command, then collect its reply
    Send(Command),
    /// Arm KVS detection; the command is kept for [`Exchange::Rearm`]
    Arm(Command),
    /// Write the last armed KVS command again
    Rearm,
    /// Only watch unsolicited output
    Listen,
}

/// A resolved catalog entry, ready to execute
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Catalog name
    pub name: &'static str,
    /// Wire action
    pub exchange: Exchange,
    /// Completion policy for the reply
    pub policy: CompletionPolicy,
    /// Time budget
    pub timeout: Duration,
    /// Only allowed over the serial link
    pub serial_only: bool,
}

impl CommandSpec {
    fn send(name: &'static str, text: impl Into<String>, timeout: Duration) -> Self {
        Self::exchange(name, Exchange::Send(Command::new(text)), timeout)
    }

    fn exchange(name: &'static str, exchange: Exchange, timeout: Duration) -> Self {
        Self {
            name,
            exchange,
            policy: CompletionPolicy::prompt(),
            timeout,
            serial_only: false,
        }
    }

    fn listen(name: &'static str, marker: &str, timeout: Duration) -> Self {
        Self {
            name,
            exchange: Exchange::Listen,
            policy: CompletionPolicy::wait_for(Pattern::ignore_case(marker)),
            timeout,
            serial_only: true,
        }
    }

    /// Replace the completion policy
    #[must_use]
    pub fn with_policy(mut self, policy: CompletionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the time budget
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn serial_only(mut self) -> Self {
        self.serial_only = true;
        self
    }

    /// Command text, empty for listeners and re-arming
    pub fn command_text(&self) -> &str {
        match &self.exchange {
            Exchange::Send(command) | Exchange::Arm(command) => command.as_str(),
            Exchange::Rearm | Exchange::Listen => "",
        }
    }
}

/// Command registry
#[derive(Debug, Clone, Default)]
pub struct CommandCatalog {
    timings: CommandTimings,
}

impl CommandCatalog {
    /// Create a catalog using the given time budgets
    pub fn new(timings: CommandTimings) -> Self {
        Self { timings }
    }

    /// Names of every catalog entry
    pub fn names(&self) -> &'static [&'static str] {
        &NAMES
    }

    /// Time budgets in use
    pub fn timings(&self) -> &CommandTimings {
        &self.timings
    }

    /// Resolve `name` with its arguments into an executable entry
    pub fn lookup(&self, name: &str, args: &[String]) -> Result<CommandSpec, CatalogError> {
        let t = &self.timings;

        let spec = match name {
            "probe" => CommandSpec::send("probe", "AT", t.command),
            "wifi_scan" => CommandSpec::send("wifi_scan", "ATWS", t.scan)
                .with_policy(CompletionPolicy::idle_after_records(t.scan_idle)),
            "wifi_status" => CommandSpec::send("wifi_status", "ATW?", t.status),
            "wifi_set_ssid" => {
                let ssid = required(name, args, "SSID")?;
                CommandSpec::send("wifi_set_ssid", format!("ATW0={}", ssid), t.command).serial_only()
            }
            "wifi_set_password" => {
                let password = required(name, args, "password")?;
                CommandSpec::send("wifi_set_password", format!("ATW1={}", password), t.command)
                    .serial_only()
            }
            "wifi_join" => CommandSpec::send("wifi_join", "ATWC", t.command).serial_only(),
            "hems_identify" => CommandSpec::send("hems_identify", "AT+HEMS_ID", t.command),
            "hems_start_logging" => CommandSpec::send("hems_start_logging", "AT+HEMS_STARTLOG", t.command),
            "hems_stop_logging" => CommandSpec::send("hems_stop_logging", "AT+HEMS_STOPLOG", t.command),
            "hems_download_logs" => CommandSpec::send("hems_download_logs", "AT+HEMS_LOGDL", t.command),
            "hems_alerts" => CommandSpec::send("hems_alerts", "AT+HEMS_ALERTS", t.command),
            "hems_get_control_plan" => CommandSpec::send("hems_get_control_plan", "AT+HEMS_GETCTL", t.command),
            "hems_set_control_plan" => {
                let plan = required(name, args, "control plan")?;
                let number = control_plan_number(&plan).ok_or_else(|| CatalogError::InvalidArgument {
                    command: name.to_string(),
                    reason: format!("unknown control plan '{}'", plan),
                })?;
                CommandSpec::send("hems_set_control_plan", format!("AT+HEMS_SETCTL={}", number), t.command)
            }
            "hems_statistics" => CommandSpec::send("hems_statistics", "AT+HEMS_STATS", t.command),
            "snapshot" => CommandSpec::send("snapshot", "SNAP=SNAPS", t.snapshot)
                .with_policy(CompletionPolicy::wait_for(Pattern::literal(SNAPSHOT_MARKER))),
            "kvs_arm" => {
                if args.is_empty() {
                    return Err(CatalogError::MissingArgument {
                        command: name.to_string(),
                        argument: "objects to detect",
                    });
                }
                let command = Command::new(format!("ATKVS={}", args.join(",")));
                CommandSpec::exchange("kvs_arm", Exchange::Arm(command), t.command)
            }
            "kvs_reactivate" => CommandSpec::exchange("kvs_reactivate", Exchange::Rearm, t.command),
            "kvs_wait_start" => CommandSpec::listen("kvs_wait_start", KVS_START_MARKER, t.kvs_start),
            "kvs_wait_done" => CommandSpec::listen("kvs_wait_done", KVS_DONE_MARKER, t.kvs_done)
                .with_policy(CompletionPolicy::count_until(
                    Pattern::ignore_case(KVS_DONE_MARKER),
                    Pattern::ignore_case("fragment"),
                )),
            "raw" => {
                let text = required(name, args, "command text")?;
                CommandSpec::send("raw", text, t.command)
            }
            other => return Err(CatalogError::UnknownCommand(other.to_string())),
        };

        Ok(spec)
    }
}

/// Join all arguments into one value, failing when there are none
fn required(command: &str, args: &[String], argument: &'static str) -> Result<String, CatalogError> {
    let value = args.join(" ");
    if value.trim().is_empty() {
        return Err(CatalogError::MissingArgument {
            command: command.to_string(),
            argument,
        });
    }
    Ok(value)
}

/// Map a control plan name (any case) or its number to the plan number
pub fn control_plan_number(plan: &str) -> Option<u8> {
    let plan = plan.trim();
    CONTROL_PLANS
        .iter()
        .find(|(name, number)| name.eq_ignore_ascii_case(plan) || number.to_string() == plan)
        .map(|(_, number)| *number)
}
