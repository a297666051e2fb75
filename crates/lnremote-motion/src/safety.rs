//! Pure safety decisions.
//!
//! Nothing here talks to the device; the sequencer calls [`evaluate`] before
//! a maneuver starts and [`evaluate_step`] before every step.

use std::fmt;

use lnremote_protocol::Axis;

use crate::maneuver::{ManeuverKind, ManeuverStep};
use crate::tracker::TrackedState;

/// Velocity stage cap for the depth axis while inside the sample.
pub const DEFAULT_INSIDE_SAMPLE_MAX_VELOCITY: u8 = 6;

/// Outcome of a safety check. Recomputed at every decision point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyVerdict {
    Allow,
    /// Allowed only after explicit confirmation.
    WarnRequireConfirm(String),
    Block(String),
}

impl SafetyVerdict {
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

impl fmt::Display for SafetyVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => f.write_str("allow"),
            Self::WarnRequireConfirm(reason) => write!(f, "confirm: {reason}"),
            Self::Block(reason) => write!(f, "block: {reason}"),
        }
    }
}

/// Configured physical limits.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyLimits {
    /// Axis that moves the pipette into the sample.
    pub depth_axis: Axis,
    /// Hard travel limits of the depth axis (µm).
    pub depth_min: f64,
    pub depth_max: f64,
    /// Depth more than this far below the surface counts as inside (µm).
    pub surface_epsilon: f64,
    pub inside_sample_max_velocity: u8,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            depth_axis: Axis::X,
            depth_min: -25_000.0,
            depth_max: 25_000.0,
            surface_epsilon: 1.0,
            inside_sample_max_velocity: DEFAULT_INSIDE_SAMPLE_MAX_VELOCITY,
        }
    }
}

impl SafetyLimits {
    pub fn depth_in_range(&self, position: f64) -> bool {
        (self.depth_min..=self.depth_max).contains(&position)
    }
}

/// `depth` is more than `epsilon` below `surface`.
pub fn is_inside_sample(depth: f64, surface: f64, epsilon: f64) -> bool {
    depth < surface - epsilon
}

fn stale_block(state: &TrackedState) -> Option<SafetyVerdict> {
    let stale = state.stale_axes();
    if stale.is_empty() {
        return None;
    }
    let axes: Vec<String> = stale.iter().map(ToString::to_string).collect();
    Some(SafetyVerdict::Block(format!(
        "position unknown: axis {} state is stale",
        axes.join(", ")
    )))
}

/// Decide whether `kind` may start.
pub fn evaluate(
    kind: &ManeuverKind,
    state: &TrackedState,
    surface: Option<f64>,
    limits: &SafetyLimits,
) -> SafetyVerdict {
    if let Some(block) = stale_block(state) {
        return block;
    }

    match kind {
        ManeuverKind::Approach { target } => {
            if limits.depth_in_range(*target) {
                SafetyVerdict::Allow
            } else {
                SafetyVerdict::Block(format!("approach target {target}um outside depth limits"))
            }
        }
        ManeuverKind::Retract => match surface {
            Some(surface) if limits.depth_in_range(surface) => SafetyVerdict::Allow,
            Some(surface) => {
                SafetyVerdict::Block(format!("surface {surface}um outside depth limits"))
            }
            None => SafetyVerdict::Block("no surface reference".into()),
        },
        ManeuverKind::MoveAway => {
            let Some(surface) = surface else {
                return SafetyVerdict::Block("no surface reference".into());
            };
            let Some(depth) = state.axis(limits.depth_axis).known_position() else {
                return SafetyVerdict::Block("depth position unknown".into());
            };
            if is_inside_sample(depth, surface, limits.surface_epsilon) {
                SafetyVerdict::WarnRequireConfirm("inside sample".into())
            } else {
                SafetyVerdict::Allow
            }
        }
        ManeuverKind::Return => SafetyVerdict::Allow,
    }
}

/// Re-check a single step immediately before it is sent.
pub fn evaluate_step(
    step: &ManeuverStep,
    state: &TrackedState,
    surface: Option<f64>,
    limits: &SafetyLimits,
) -> SafetyVerdict {
    if let Some(block) = stale_block(state) {
        return block;
    }
    if !step.requires_above_surface {
        return SafetyVerdict::Allow;
    }

    let Some(surface) = surface else {
        return SafetyVerdict::Block("no surface reference".into());
    };
    match state.axis(limits.depth_axis).known_position() {
        Some(depth) if !is_inside_sample(depth, surface, limits.surface_epsilon) => {
            SafetyVerdict::Allow
        }
        Some(depth) => SafetyVerdict::Block(format!(
            "depth {depth}um still inside sample (surface {surface}um)"
        )),
        None => SafetyVerdict::Block("depth position unknown".into()),
    }
}
