use std::future::Future;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use lnremote::protocol::{Axis, SpeedMode};
use lnremote::transport::{DEFAULT_BAUD_RATE, DEFAULT_TCP_PORT};

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod axis;
pub mod connection;
pub mod doctor;
pub mod maneuver;
pub mod monitor;
pub mod status;
pub mod version;

/// Settings shared by every subcommand.
#[derive(Debug)]
pub struct Context {
    pub format: OutputFormat,
    pub connection: ConnectionArgs,
    pub timeout: Duration,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Poll all axes and print their positions.
    Status,
    /// Power on an axis.
    Enable(AxisArgs),
    /// Power off an axis.
    Disable(AxisArgs),
    /// Set the velocity stage used by one speed mode.
    Velocity(VelocityArgs),
    /// Select slow or fast positioning.
    SpeedMode(SpeedModeArgs),
    /// Move one axis.
    Move(MoveArgs),
    /// Stop one axis, or all axes.
    Stop(StopArgs),
    /// Drive the depth axis to a target depth.
    Approach(ApproachArgs),
    /// Drive the depth axis back to the surface.
    Retract(SurfaceArgs),
    /// Retract if needed, then withdraw laterally for a pipette exchange.
    MoveAway(MoveAwayArgs),
    /// Bring the lateral axes back to 0 after a pipette exchange.
    Return,
    /// Poll continuously and print position reports.
    Monitor(MonitorArgs),
    /// Check serial ports and query the configured control unit.
    Doctor,
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, ctx: &Context) -> CliResult<i32> {
    match command {
        Command::Version(args) => version::run(args),
        Command::Status => block_on(status::run(ctx)),
        Command::Enable(args) => block_on(axis::enable(args, true, ctx)),
        Command::Disable(args) => block_on(axis::enable(args, false, ctx)),
        Command::Velocity(args) => block_on(axis::velocity(args, ctx)),
        Command::SpeedMode(args) => block_on(axis::speed_mode(args, ctx)),
        Command::Move(args) => block_on(axis::move_axis(args, ctx)),
        Command::Stop(args) => block_on(axis::stop(args, ctx)),
        Command::Approach(args) => block_on(maneuver::approach(args, ctx)),
        Command::Retract(args) => block_on(maneuver::retract(args, ctx)),
        Command::MoveAway(args) => block_on(maneuver::move_away(args, ctx)),
        Command::Return => block_on(maneuver::return_lateral(ctx)),
        Command::Monitor(args) => block_on(monitor::run(args, ctx)),
        Command::Doctor => block_on(doctor::run(ctx)),
    }
}

fn block_on<F>(future: F) -> CliResult<i32>
where
    F: Future<Output = CliResult<i32>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("failed to start runtime: {err}")))?;
    runtime.block_on(future)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ConnectionKind {
    Serial,
    Tcp,
    /// In-process simulated control unit.
    Dummy,
}

#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// How to reach the control unit.
    #[arg(
        long,
        value_name = "KIND",
        env = "LNREMOTE_CONNECTION",
        default_value = "serial",
        global = true
    )]
    pub connection: ConnectionKind,

    /// USB serial number of the control unit's adapter.
    #[arg(long, value_name = "SERIAL", env = "LNREMOTE_SERIAL", global = true)]
    pub serial: Option<String>,

    /// Serial device path; takes precedence over --serial.
    #[arg(long, value_name = "PATH", env = "LNREMOTE_DEVICE", global = true)]
    pub device: Option<String>,

    #[arg(
        long,
        value_name = "BAUD",
        env = "LNREMOTE_BAUDRATE",
        default_value_t = DEFAULT_BAUD_RATE,
        global = true
    )]
    pub baud_rate: u32,

    /// Control unit address for TCP connections.
    #[arg(long, value_name = "HOST", env = "LNREMOTE_IP", global = true)]
    pub host: Option<String>,

    #[arg(
        long,
        value_name = "PORT",
        env = "LNREMOTE_PORT",
        default_value_t = DEFAULT_TCP_PORT,
        global = true
    )]
    pub port: u16,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum SpeedArg {
    Slow,
    Fast,
}

impl From<SpeedArg> for SpeedMode {
    fn from(arg: SpeedArg) -> Self {
        match arg {
            SpeedArg::Slow => SpeedMode::Slow,
            SpeedArg::Fast => SpeedMode::Fast,
        }
    }
}

#[derive(Args, Debug)]
pub struct AxisArgs {
    /// Axis (x, y or z).
    pub axis: Axis,
}

#[derive(Args, Debug)]
pub struct VelocityArgs {
    pub axis: Axis,
    /// Velocity stage, 1 (slowest) to 15.
    pub stage: u8,
    /// Speed mode the stage applies to.
    #[arg(long, value_enum, default_value = "slow")]
    pub mode: SpeedArg,
    /// Surface reference (µm) for the inside-sample velocity cap.
    #[arg(long, allow_negative_numbers = true)]
    pub surface: Option<f64>,
}

#[derive(Args, Debug)]
pub struct SpeedModeArgs {
    pub axis: Axis,
    #[arg(value_enum)]
    pub mode: SpeedArg,
}

#[derive(Args, Debug)]
pub struct MoveArgs {
    pub axis: Axis,
    /// Target position in micrometers (a distance with --relative).
    #[arg(allow_negative_numbers = true)]
    pub target: f64,
    /// Move by TARGET instead of to it.
    #[arg(long)]
    pub relative: bool,
}

#[derive(Args, Debug)]
pub struct StopArgs {
    /// Axis to stop. Default: all axes.
    pub axis: Option<Axis>,
}

#[derive(Args, Debug)]
pub struct SurfaceArgs {
    /// Depth-axis position of the sample surface in micrometers.
    #[arg(long, allow_negative_numbers = true)]
    pub surface: f64,
}

#[derive(Args, Debug)]
pub struct ApproachArgs {
    /// Target depth in micrometers.
    #[arg(allow_negative_numbers = true)]
    pub depth: f64,
    /// Record the surface reference before approaching.
    #[arg(long, allow_negative_numbers = true)]
    pub surface: Option<f64>,
}

#[derive(Args, Debug)]
pub struct MoveAwayArgs {
    #[command(flatten)]
    pub surface: SurfaceArgs,
    /// Proceed even when the pipette is inside the sample.
    #[arg(long, short = 'y')]
    pub yes: bool,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Exit after printing N position reports.
    #[arg(long)]
    pub count: Option<usize>,
    /// Poll interval (e.g. 250ms, 1s).
    #[arg(long, default_value = "250ms")]
    pub interval: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `150ms`, `5s` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
