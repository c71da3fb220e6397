//! Interactive shell input
//!
//! Plain lines are sent to the device as commands. Lines starting with
//! `:` are shell directives.

use crate::core::connection::CloseTarget;

/// Shell help text
pub const HELP: &str = "\
  <text>              send <text> as a command (prompt completion)
  :status             show open links
  :close serial|tcp|all
  :run NAME [ARGS]    run a catalog command
  :list               list catalog commands
  :help               show this help
  :quit               leave the shell";

/// One parsed shell line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellInput {
    /// Blank line
    Empty,
    /// Send the text as a command
    Send(String),
    /// Report link status
    Status,
    /// Close links
    Close(CloseTarget),
    /// Run a catalog entry
    Run {
        /// Catalog name
        name: String,
        /// Arguments
        args: Vec<String>,
    },
    /// List catalog entries
    List,
    /// Show help
    Help,
    /// Leave the shell
    Quit,
    /// Unparseable directive, with the reason
    Invalid(String),
}

impl ShellInput {
    /// Parse a line read from stdin
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Self::Empty;
        }

        let Some(directive) = line.trim_start().strip_prefix(':') else {
            return Self::Send(line.to_string());
        };

        let mut words = directive.split_whitespace();
        match words.next().unwrap_or_default() {
            "status" => Self::Status,
            "close" => {
                let target = words.next().unwrap_or("all");
                match target.parse::<CloseTarget>() {
                    Ok(target) => Self::Close(target),
                    Err(e) => Self::Invalid(e.to_string()),
                }
            }
            "run" => match words.next() {
                Some(name) => Self::Run {
                    name: name.to_string(),
                    args: words.map(str::to_string).collect(),
                },
                None => Self::Invalid(":run needs a command name".to_string()),
            },
            "list" => Self::List,
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            other => Self::Invalid(format!("unknown directive ':{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_lines_are_sent() {
        assert_eq!(ShellInput::parse("ATW?\r\n"), ShellInput::Send("ATW?".into()));
        assert_eq!(ShellInput::parse("ATW0=My Net"), ShellInput::Send("ATW0=My Net".into()));
        assert_eq!(ShellInput::parse("   \n"), ShellInput::Empty);
    }

    #[test]
    fn test_directives() {
        assert_eq!(ShellInput::parse(":status"), ShellInput::Status);
        assert_eq!(ShellInput::parse(":close tcp"), ShellInput::Close(CloseTarget::Tcp));
        assert_eq!(ShellInput::parse(":close"), ShellInput::Close(CloseTarget::All));
        assert_eq!(
            ShellInput::parse(":run hems_set_control_plan Night Mode"),
            ShellInput::Run {
                name: "hems_set_control_plan".into(),
                args: vec!["Night".into(), "Mode".into()],
            }
        );
        assert_eq!(ShellInput::parse(":quit"), ShellInput::Quit);
        assert!(matches!(ShellInput::parse(":close usb"), ShellInput::Invalid(_)));
        assert!(matches!(ShellInput::parse(":reboot"), ShellInput::Invalid(_)));
        assert!(matches!(ShellInput::parse(":run"), ShellInput::Invalid(_)));
    }
}
