use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use lnremote::motion::{AxisState, ManeuverKind, ManeuverState, TrackedState};
use lnremote::protocol::{Axis, Frame};
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Debug, Serialize)]
struct AxisOutput {
    axis: String,
    position_um: Option<f64>,
    moving: bool,
    enabled: bool,
    stale: bool,
    speed_mode: String,
    velocity: Option<u8>,
}

impl AxisOutput {
    fn new(axis: Axis, state: &AxisState) -> Self {
        Self {
            axis: axis.to_string(),
            position_um: state.position,
            moving: state.moving,
            enabled: state.enabled,
            stale: state.stale,
            speed_mode: state.speed_mode.to_string(),
            velocity: state.velocity,
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusOutput<'a> {
    kind: &'static str,
    endpoint: &'a str,
    surface_um: Option<f64>,
    axes: Vec<AxisOutput>,
}

#[derive(Debug, Serialize)]
struct ManeuverOutput {
    kind: &'static str,
    maneuver: String,
    state: &'static str,
    detail: Option<String>,
    axes: Vec<AxisOutput>,
}

#[derive(Debug, Serialize)]
struct ReportOutput {
    kind: &'static str,
    timestamp: String,
    axis: String,
    position_um: f64,
    moving: bool,
    enabled: bool,
}

#[derive(Debug, Serialize)]
struct AckOutput<'a> {
    kind: &'static str,
    command: &'a str,
    axis: Option<String>,
    ok: bool,
}

fn axes_output(state: &TrackedState) -> Vec<AxisOutput> {
    state
        .iter()
        .map(|(axis, axis_state)| AxisOutput::new(axis, axis_state))
        .collect()
}

fn position_text(position: Option<f64>) -> String {
    position.map_or_else(|| "unknown".to_string(), |p| format!("{p:.2}"))
}

fn flags_text(state: &AxisState) -> String {
    let mut flags = Vec::new();
    if state.moving {
        flags.push("moving");
    }
    if !state.enabled {
        flags.push("disabled");
    }
    if state.stale {
        flags.push("stale");
    }
    if flags.is_empty() {
        "idle".to_string()
    } else {
        flags.join(",")
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn axes_table(state: &TrackedState) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["AXIS", "POSITION (um)", "STATE", "SPEED", "STAGE"]);
    for (axis, axis_state) in state.iter() {
        table.add_row(vec![
            axis.to_string(),
            position_text(axis_state.position),
            flags_text(axis_state),
            axis_state.speed_mode.to_string(),
            axis_state
                .velocity
                .map_or_else(|| "-".to_string(), |v| v.to_string()),
        ]);
    }
    table
}

pub fn print_status(
    state: &TrackedState,
    endpoint: &str,
    surface: Option<f64>,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => print_json(&StatusOutput {
            kind: "status",
            endpoint,
            surface_um: surface,
            axes: axes_output(state),
        }),
        OutputFormat::Table => {
            println!("{}", axes_table(state));
        }
        OutputFormat::Pretty => {
            println!("endpoint={endpoint}");
            for (axis, axis_state) in state.iter() {
                println!(
                    "{axis}: {} um [{}]",
                    position_text(axis_state.position),
                    flags_text(axis_state)
                );
            }
        }
    }
}

fn state_name(state: &ManeuverState) -> (&'static str, Option<String>) {
    match state {
        ManeuverState::Requested { warning } => ("requested", warning.clone()),
        ManeuverState::InProgress { step, of } => {
            ("in_progress", Some(format!("step {}/{of}", step + 1)))
        }
        ManeuverState::Completed => ("completed", None),
        ManeuverState::Aborted(reason) => ("aborted", Some(reason.clone())),
        ManeuverState::Failed(reason) => ("failed", Some(reason.clone())),
    }
}

pub fn print_maneuver(
    kind: ManeuverKind,
    outcome: &ManeuverState,
    state: &TrackedState,
    format: OutputFormat,
) {
    let (name, detail) = state_name(outcome);
    match format {
        OutputFormat::Json => print_json(&ManeuverOutput {
            kind: "maneuver",
            maneuver: kind.to_string(),
            state: name,
            detail,
            axes: axes_output(state),
        }),
        OutputFormat::Table => {
            println!("{kind}: {outcome}");
            println!("{}", axes_table(state));
        }
        OutputFormat::Pretty => {
            println!("{kind}: {outcome}");
        }
    }
}

pub fn print_report(frame: &Frame, format: OutputFormat) {
    let Frame::PositionReport {
        axis,
        position,
        moving,
        enabled,
    } = *frame
    else {
        return;
    };
    match format {
        OutputFormat::Json => print_json(&ReportOutput {
            kind: "position",
            timestamp: now_unix_millis(),
            axis: axis.to_string(),
            position_um: position,
            moving,
            enabled,
        }),
        OutputFormat::Table | OutputFormat::Pretty => {
            let state = if moving { "moving" } else { "idle" };
            println!("{axis} {position:>12.2} um  {state}");
        }
    }
}

pub fn print_ack(command: &str, axis: Option<Axis>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&AckOutput {
            kind: "ack",
            command,
            axis: axis.map(|a| a.to_string()),
            ok: true,
        }),
        OutputFormat::Table | OutputFormat::Pretty => match axis {
            Some(axis) => println!("{command} {axis}: ok"),
            None => println!("{command}: ok"),
        },
    }
}

fn now_unix_millis() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
