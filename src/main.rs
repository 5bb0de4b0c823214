//! rustcat - netcat-style TCP relay
//!
//! Listens for or dials a single TCP connection and relays it to stdio, an
//! interactive interpreter, a one-shot command, or a file.

use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rustcat::config::{ConfigManager, SessionConfig, SessionRequest};
use rustcat::error::{CatError, EXIT_CONFIG, EXIT_INTERNAL, EXIT_OK};
use rustcat::mode::{ModeController, SessionReport};
use rustcat::ShutdownCoordinator;

/// CLI arguments for rustcat
#[derive(Parser, Debug)]
#[command(name = "rustcat")]
#[command(about = "rustcat - netcat-style TCP relay with shell and upload modes")]
#[command(version)]
#[command(after_help = "
Examples:
  rustcat -l -p 5555 -c                 # serve an interactive shell
  rustcat -l -p 5555 -u received.bin    # receive one upload
  rustcat -l -p 5555 -e \"cat /etc/hosts\" # send a command's output
  rustcat -t 192.168.1.108 -p 5555 < f  # send a file / talk to a server

Exit codes:
  0    connection closed cleanly / upload complete
  1    internal error
  2    invalid configuration or usage
  3    could not resolve, bind, accept or connect (or timed out)
  4    I/O failure while relaying, or incomplete upload
  5    subprocess could not be started
  130  interrupted by SIGINT/SIGTERM

Environment variables:
  RUSTCAT_BUFFER_SIZE      - Relay buffer size in bytes
  RUSTCAT_CONNECT_TIMEOUT  - Connect timeout (e.g. 10s)
  RUSTCAT_DRAIN_TIMEOUT    - Drain timeout after one side's EOF (e.g. 2s)
  RUSTCAT_SHELL            - Default interpreter for --shell
  RUSTCAT_LOG_LEVEL        - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Target host (connect) or bind address (listen)
    #[arg(short, long)]
    pub target: Option<String>,

    /// Port to connect to or listen on
    #[arg(short, long, default_value_t = 5555)]
    pub port: u16,

    /// Listen for a single incoming connection instead of connecting
    #[arg(short, long)]
    pub listen: bool,

    /// Relay an interactive interpreter (default from config: /bin/sh)
    #[arg(
        short = 'c',
        long = "shell",
        value_name = "CMD",
        num_args = 0..=1,
        default_missing_value = "",
        conflicts_with_all = ["execute", "upload"]
    )]
    pub shell: Option<String>,

    /// Run a command once and send its output to the peer
    #[arg(short, long, value_name = "CMD", conflicts_with = "upload")]
    pub execute: Option<String>,

    /// Receive the incoming stream into this file
    #[arg(short, long, value_name = "PATH")]
    pub upload: Option<PathBuf>,

    /// Overwrite an existing upload destination
    #[arg(short, long)]
    pub force: bool,

    /// Don't send "Saved file ..." back after an upload
    #[arg(long)]
    pub no_ack: bool,

    /// Connect timeout in seconds
    #[arg(short = 'w', long = "timeout", value_name = "SECS")]
    pub timeout: Option<u64>,

    /// After one side reaches EOF, stop the other after this many seconds
    #[arg(long, value_name = "SECS")]
    pub drain_timeout: Option<u64>,

    /// Relay buffer size in bytes
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Configuration file path
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Validate configuration and exit
    #[arg(long)]
    pub validate_config: bool,
}

impl CliArgs {
    fn session_request(&self) -> SessionRequest {
        SessionRequest {
            host: self.target.clone(),
            port: self.port,
            listen: self.listen,
            shell: self.shell.clone(),
            execute: self.execute.clone(),
            upload: self.upload.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    let code = run().await;
    // Exit directly: a stdin read parked on a blocking thread must not hold the process open
    std::process::exit(code);
}

async fn run() -> i32 {
    let args = CliArgs::parse();

    let mut config = match ConfigManager::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("rustcat: invalid configuration: {:#}", e);
            return EXIT_CONFIG;
        }
    };
    config.merge_with_cli_args(
        args.buffer_size,
        args.timeout,
        args.drain_timeout,
        args.force,
        args.no_ack,
        args.log_level.as_deref(),
    );

    init_tracing(&config.log_level, args.verbose);

    let session = match ConfigManager::resolve(config, args.session_request()) {
        Ok(session) => session,
        Err(e) => return fail(e),
    };

    if args.validate_config {
        print_summary(&session);
        return EXIT_OK;
    }

    let controller = match ModeController::new(session) {
        Ok(controller) => controller,
        Err(e) => return fail(e),
    };

    let coordinator = Arc::new(ShutdownCoordinator::new());
    let shutdown_rx = coordinator.subscribe();
    let signals = Arc::clone(&coordinator);
    tokio::spawn(async move {
        if let Err(e) = signals.listen_for_signals().await {
            error!("Error setting up signal handlers: {}", e);
        }
    });

    match controller.run(shutdown_rx).await {
        Ok(report) => {
            log_report(&report);
            EXIT_OK
        }
        Err(e) => fail(e),
    }
}

fn fail(e: CatError) -> i32 {
    error!("{}", e);
    let code = e.exit_code();
    if code == EXIT_INTERNAL {
        eprintln!("rustcat: {}", e);
    }
    code
}

fn log_report(report: &SessionReport) {
    match report {
        SessionReport::Relayed(stats) => info!(
            "Connection closed: {} bytes sent, {} bytes received",
            stats.bytes_sent, stats.bytes_received
        ),
        SessionReport::Shell { stats, exit } | SessionReport::Executed { stats, exit } => info!(
            "Command session closed: {} bytes sent, {} bytes received, process {}",
            stats.bytes_sent,
            stats.bytes_received,
            exit.map(|e| e.to_string()).unwrap_or_else(|| "not reaped".to_string())
        ),
        SessionReport::Uploaded(upload) => info!(
            "Upload complete: {} bytes saved to {}",
            upload.bytes,
            upload.path.display()
        ),
    }
}

fn print_summary(session: &SessionConfig) {
    eprintln!("Configuration is valid");
    eprintln!("  Role: {:?}", session.role);
    eprintln!("  Address: {}", session.address());
    eprintln!("  Behavior: {}", session.behavior);
    eprintln!("  Buffer size: {} bytes", session.relay.buffer_size);
    eprintln!("  Connect timeout: {:?}", session.relay.connect_timeout);
    if let Some(drain) = session.relay.drain_timeout {
        eprintln!("  Drain timeout: {:?}", drain);
    }
}

/// Initialize tracing/logging. Logs go to stderr; stdout carries relay data.
fn init_tracing(log_level: &str, verbose: u8) {
    let level = match verbose {
        0 => log_level,
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(true),
        )
        .with(env_filter)
        .init();
}
