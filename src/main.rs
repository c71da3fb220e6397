//! Ameba Link - command-line front end
//!
//! Opens the serial and/or TCP link to an Ameba board, runs console
//! commands through the framing engine and prints the raw replies.

use ameba_link::cli::shell::HELP;
use ameba_link::cli::{
    classify, render_close, render_open, render_ports, render_response, render_status, CliResult,
    OutputFormat, ShellInput,
};
use ameba_link::config::{self, AppConfig};
use ameba_link::core::transport::list_ports;
use ameba_link::{
    CloseTarget, Command, CommandCatalog, CompletionPolicy, ConnectionState, Pattern,
    TranscriptWriter, TransportKind,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Ameba Link CLI
#[derive(Parser, Debug)]
#[command(
    name = "ameba-link",
    version,
    about = "AT-command console for Ameba boards over serial or TCP/Telnet",
    long_about = None
)]
struct Cli {
    /// Configuration file (default: platform config dir)
    #[arg(long, global = true, env = "AMEBA_LINK_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Write a transcript of every exchange to this file
    #[arg(long, global = true)]
    transcript: Option<PathBuf>,

    /// Serial port to open (e.g. COM3, /dev/ttyUSB0)
    #[arg(long, global = true, env = "AMEBA_SERIAL")]
    serial: Option<String>,

    /// Serial baud rate
    #[arg(long, global = true)]
    baud: Option<u32>,

    /// Host to open a TCP link to
    #[arg(long, global = true, env = "AMEBA_HOST")]
    tcp: Option<String>,

    /// TCP port (23 drains the Telnet preamble)
    #[arg(long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts,

    /// Send one command and print the reply
    Send {
        /// Command text (CR-LF is appended)
        command: String,

        /// Link to use (default: serial if open, else tcp)
        #[arg(long)]
        via: Option<TransportKind>,

        /// Complete when this text appears
        #[arg(long, conflicts_with_all = ["until", "idle"])]
        wait_for: Option<String>,

        /// Complete when END appears after START
        #[arg(long, num_args = 2, value_names = ["START", "END"], conflicts_with = "idle")]
        until: Option<Vec<String>>,

        /// Complete when no new result record arrives for the scan idle time
        #[arg(long)]
        idle: bool,

        /// Match --wait-for / --until markers in any case
        #[arg(long)]
        ignore_case: bool,

        /// Time budget in seconds
        #[arg(long, value_parser = parse_secs)]
        timeout: Option<Duration>,
    },

    /// Run a catalog command (see `commands`)
    Run {
        /// Catalog name
        name: String,

        /// Arguments
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,

        /// Link to use (default: serial if open, else tcp)
        #[arg(long)]
        via: Option<TransportKind>,

        /// Time budget in seconds
        #[arg(long, value_parser = parse_secs)]
        timeout: Option<Duration>,
    },

    /// List catalog commands
    Commands,

    /// Interactive console on stdin
    Shell {
        /// Link to use (default: serial if open, else tcp)
        #[arg(long)]
        via: Option<TransportKind>,
    },

    /// Show exit codes
    ExitCodes,
}

fn parse_secs(value: &str) -> Result<Duration, String> {
    let secs: f64 = value.parse().map_err(|e| format!("{}", e))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err("timeout must be a positive number of seconds".to_string());
    }
    Ok(Duration::from_secs_f64(secs))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return CliResult::from(&e).to_exit_code();
        }
    };

    init_logging(&cli, &config);
    tracing::debug!("Starting {} v{}", ameba_link::NAME, ameba_link::VERSION);

    let result = match run(&cli, &config).await {
        Ok(result) => result,
        Err(e) => classify(&e),
    };

    if let CliResult::Error(_, msg) = &result {
        eprintln!("Error: {}", msg);
    } else if let Some(msg) = result.message() {
        if !cli.quiet {
            eprintln!("{}", msg);
        }
    }
    result.to_exit_code()
}

fn init_logging(cli: &Cli, config: &AppConfig) {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        config.logging.level.as_str()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: &Cli, config: &AppConfig) -> anyhow::Result<CliResult> {
    match &cli.command {
        Commands::ListPorts => {
            let ports = list_ports()?;
            println!("{}", render_ports(&ports, cli.format));
            Ok(CliResult::success())
        }
        Commands::Commands => {
            for name in CommandCatalog::default().names() {
                println!("{}", name);
            }
            Ok(CliResult::success())
        }
        Commands::ExitCodes => {
            ameba_link::cli::print_exit_codes();
            Ok(CliResult::success())
        }
        Commands::Send { command, via, wait_for, until, idle, ignore_case, timeout } => {
            let (policy, default_timeout) =
                send_policy(config, wait_for.as_deref(), until.as_deref(), *idle, *ignore_case);
            let state = open_links(cli, config).await?;
            let result = state
                .execute(*via, &Command::new(command.as_str()), &policy, timeout.unwrap_or(default_timeout))
                .await
                .with_context(|| format!("sending {}", command));
            state.close(CloseTarget::All).await;

            let result = result?;
            println!("{}", render_response(&result, cli.format));
            Ok(CliResult::from_response(&result))
        }
        Commands::Run { name, args, via, timeout } => {
            let catalog = CommandCatalog::new(config.command_timings());
            let mut spec = match catalog.lookup(name, args) {
                Ok(spec) => spec,
                Err(e) => return Ok(CliResult::invalid_args(e.to_string())),
            };
            if let Some(timeout) = timeout {
                spec = spec.with_timeout(*timeout);
            }

            let state = open_links(cli, config).await?;
            let result = state.run(&spec, *via).await.with_context(|| format!("running {}", name));
            state.close(CloseTarget::All).await;

            let result = result?;
            println!("{}", render_response(&result, cli.format));
            Ok(CliResult::from_response(&result))
        }
        Commands::Shell { via } => {
            let state = open_links(cli, config).await?;
            let outcome = shell(cli, config, &state, *via).await;
            state.close(CloseTarget::All).await;
            outcome?;
            Ok(CliResult::success())
        }
    }
}

fn send_policy(
    config: &AppConfig,
    wait_for: Option<&str>,
    until: Option<&[String]>,
    idle: bool,
    ignore_case: bool,
) -> (CompletionPolicy, Duration) {
    let pattern = |text: &str| {
        if ignore_case {
            Pattern::ignore_case(text)
        } else {
            Pattern::literal(text)
        }
    };
    let timings = config.command_timings();

    if let Some(text) = wait_for {
        (CompletionPolicy::wait_for(pattern(text)), timings.command)
    } else if let Some([start, end]) = until {
        let policy = CompletionPolicy::WaitForPatternThenPattern {
            start: pattern(start.as_str()),
            end: pattern(end.as_str()),
            grace: config.timing.grace_read(),
        };
        (policy, timings.scan)
    } else if idle {
        (CompletionPolicy::idle_after_records(timings.scan_idle), timings.scan)
    } else {
        (CompletionPolicy::PromptSuffix { prompt: config.device.prompt }, timings.command)
    }
}

async fn open_links(cli: &Cli, config: &AppConfig) -> anyhow::Result<ConnectionState> {
    let mut state = ConnectionState::new(config.link_settings());

    let transcript = cli.transcript.clone().or_else(|| config.logging.transcript.clone());
    if let Some(path) = transcript {
        let path = resolve_transcript(&path)?;
        let writer = TranscriptWriter::shared(&path, config.logging.transcript_format)
            .with_context(|| format!("opening transcript {}", path.display()))?;
        state = state.with_transcript(writer);
    }

    let serial = cli.serial.clone().or_else(|| config.serial.port.clone());
    if let Some(port) = serial {
        let baud = cli.baud.unwrap_or(config.serial.baud);
        let outcome = state
            .open_serial(&port, baud)
            .await
            .with_context(|| format!("opening {}", port))?;
        report(cli, &render_open(&outcome, cli.format));
    }

    let host = cli.tcp.clone().or_else(|| config.tcp.host.clone());
    if let Some(host) = host {
        let port = cli.port.unwrap_or(config.tcp.port);
        let outcome = state
            .open_tcp(&host, port)
            .await
            .with_context(|| format!("connecting to {}:{}", host, port))?;
        report(cli, &render_open(&outcome, cli.format));
    }

    Ok(state)
}

/// A bare file name lands in the transcript directory
fn resolve_transcript(path: &Path) -> anyhow::Result<PathBuf> {
    let bare = path.parent().map_or(true, |p| p.as_os_str().is_empty());
    if !bare {
        return Ok(path.to_path_buf());
    }
    match config::transcript_dir() {
        Some(dir) => {
            config::init_directories().with_context(|| format!("creating {}", dir.display()))?;
            Ok(dir.join(path))
        }
        None => Ok(path.to_path_buf()),
    }
}

fn report(cli: &Cli, text: &str) {
    if !cli.quiet {
        eprintln!("{}", text);
    }
}

async fn shell(
    cli: &Cli,
    config: &AppConfig,
    state: &ConnectionState,
    via: Option<TransportKind>,
) -> anyhow::Result<()> {
    let catalog = CommandCatalog::new(config.command_timings());
    let prompt = CompletionPolicy::PromptSuffix { prompt: config.device.prompt };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    report(cli, "Type :help for directives, :quit to leave");
    while let Some(line) = lines.next_line().await? {
        match ShellInput::parse(&line) {
            ShellInput::Empty => {}
            ShellInput::Quit => break,
            ShellInput::Help => println!("{}", HELP),
            ShellInput::List => println!("{}", catalog.names().join("\n")),
            ShellInput::Status => println!("{}", render_status(&state.status().await, cli.format)),
            ShellInput::Close(target) => println!("{}", render_close(&state.close(target).await, cli.format)),
            ShellInput::Invalid(reason) => eprintln!("Error: {}", reason),
            ShellInput::Send(text) => {
                let timeout = config.timing.command_timeout();
                match state.execute(via, &Command::new(text), &prompt, timeout).await {
                    Ok(result) => println!("{}", render_response(&result, cli.format)),
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            ShellInput::Run { name, args } => {
                let outcome = match catalog.lookup(&name, &args) {
                    Ok(spec) => state.run(&spec, via).await.map_err(anyhow::Error::from),
                    Err(e) => Err(e.into()),
                };
                match outcome {
                    Ok(result) => println!("{}", render_response(&result, cli.format)),
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
        }
    }

    Ok(())
}
