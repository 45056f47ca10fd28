use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod decode;
pub mod heartbeat;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the telemetry bridge and the camera stream.
    Serve(ServeArgs),
    /// Decode a raw telemetry capture and print its messages.
    Decode(DecodeArgs),
    /// Act as a ground station: send heartbeats to a bridge and print the replies.
    Heartbeat(HeartbeatArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Heartbeat(args) => heartbeat::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// JSON configuration file; flags below override its values.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Serial device wired to the flight controller.
    #[arg(long, value_name = "DEVICE")]
    pub serial: Option<String>,
    /// Serial line rate.
    #[arg(long, value_name = "BAUD")]
    pub baud: Option<u32>,
    /// UDP address ground stations send telemetry to.
    #[arg(long, value_name = "ADDR")]
    pub udp_bind: Option<SocketAddr>,
    /// Maximum number of tracked ground stations.
    #[arg(long)]
    pub max_endpoints: Option<usize>,
    /// HTTP address of the camera stream.
    #[arg(long, value_name = "ADDR")]
    pub http_bind: Option<SocketAddr>,
    /// Maximum number of simultaneous stream viewers.
    #[arg(long)]
    pub max_clients: Option<usize>,
    /// Do not start the camera stream.
    #[arg(long)]
    pub no_stream: bool,
    /// Directory of JPEG files replayed as the camera feed.
    #[arg(long, value_name = "DIR")]
    pub frames: Option<PathBuf>,
    /// Replay rate for --frames.
    #[arg(long)]
    pub fps: Option<u32>,
    /// How often to log link status (e.g. 10s, 500ms).
    #[arg(long, default_value = "10s")]
    pub status_interval: String,
    /// Stop after this long instead of waiting for Ctrl-C.
    #[arg(long, value_name = "DURATION")]
    pub run_for: Option<String>,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Capture file, or `-` for stdin.
    pub path: PathBuf,
    /// Stop after N messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// Print only the message and checksum counters.
    #[arg(long)]
    pub summary: bool,
}

#[derive(Args, Debug)]
pub struct HeartbeatArgs {
    /// Bridge telemetry address.
    #[arg(default_value = "127.0.0.1:14550")]
    pub target: SocketAddr,
    /// Local address to send from.
    #[arg(long, default_value = "0.0.0.0:0")]
    pub bind: SocketAddr,
    /// Time between heartbeats (e.g. 1s, 250ms).
    #[arg(long, default_value = "1s")]
    pub interval: String,
    /// Exit after N heartbeats (and one more interval of listening).
    #[arg(long)]
    pub count: Option<usize>,
    /// System id to send as.
    #[arg(long, default_value = "255")]
    pub system_id: u8,
    /// Component id to send as.
    #[arg(long, default_value = "190")]
    pub component_id: u8,
    /// Use v1 framing.
    #[arg(long)]
    pub v1: bool,
    /// Do not print messages received from the bridge.
    #[arg(long)]
    pub quiet: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

pub(crate) fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
