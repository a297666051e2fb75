use std::fmt;

use lnremote_protocol::{Axis, SpeedMode};
use tokio::sync::watch;

use crate::config::MotionConfig;
use crate::safety::is_inside_sample;
use crate::tracker::TrackedState;

/// A compound, safety-checked operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ManeuverKind {
    /// Move the depth axis to `target` (µm).
    Approach { target: f64 },
    /// Move the depth axis back to the surface reference.
    Retract,
    /// Retract if inside the sample, then withdraw laterally.
    MoveAway,
    /// Bring every non-depth axis back to 0 after a pipette exchange.
    Return,
}

impl fmt::Display for ManeuverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approach { target } => write!(f, "approach({target:.2}um)"),
            Self::Retract => f.write_str("retract"),
            Self::MoveAway => f.write_str("move-away"),
            Self::Return => f.write_str("return"),
        }
    }
}

/// Where a step goes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepTarget {
    Absolute(f64),
    /// Relative to the axis position when the step starts.
    Offset(f64),
}

/// One primitive move of a maneuver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManeuverStep {
    pub axis: Axis,
    pub target: StepTarget,
    pub mode: SpeedMode,
    /// Only run once the depth axis is at or above the surface.
    pub requires_above_surface: bool,
}

impl ManeuverStep {
    fn absolute(axis: Axis, target: f64, mode: SpeedMode) -> Self {
        Self {
            axis,
            target: StepTarget::Absolute(target),
            mode,
            requires_above_surface: false,
        }
    }
}

/// Expand `kind` into primitive steps.
///
/// `surface` must be set for Retract and Move Away; the caller checks.
pub fn plan(
    kind: &ManeuverKind,
    state: &TrackedState,
    surface: Option<f64>,
    config: &MotionConfig,
) -> Vec<ManeuverStep> {
    let depth_axis = config.limits.depth_axis;
    match kind {
        ManeuverKind::Approach { target } => {
            vec![ManeuverStep::absolute(depth_axis, *target, config.approach_speed)]
        }
        ManeuverKind::Retract => surface
            .map(|surface| ManeuverStep::absolute(depth_axis, surface, config.retract_speed))
            .into_iter()
            .collect(),
        ManeuverKind::MoveAway => {
            let mut steps = Vec::with_capacity(2);
            if let Some(surface) = surface {
                let inside = state
                    .axis(depth_axis)
                    .known_position()
                    .is_none_or(|depth| {
                        is_inside_sample(depth, surface, config.limits.surface_epsilon)
                    });
                if inside {
                    steps.push(ManeuverStep::absolute(
                        depth_axis,
                        surface,
                        config.retract_speed,
                    ));
                }
            }
            steps.push(ManeuverStep {
                axis: config.lateral_axis,
                target: StepTarget::Offset(config.move_away_offset),
                mode: config.lateral_speed,
                requires_above_surface: true,
            });
            steps
        }
        ManeuverKind::Return => Axis::ALL
            .into_iter()
            .filter(|axis| *axis != depth_axis)
            .map(|axis| ManeuverStep::absolute(axis, 0.0, config.lateral_speed))
            .collect(),
    }
}

/// Lifecycle of a maneuver. The last three states are terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum ManeuverState {
    /// Accepted; waiting for confirmation when `warning` is set.
    Requested { warning: Option<String> },
    InProgress { step: usize, of: usize },
    Completed,
    Aborted(String),
    Failed(String),
}

impl ManeuverState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted(_) | Self::Failed(_))
    }

    pub fn awaiting_confirmation(&self) -> bool {
        matches!(self, Self::Requested { warning: Some(_) })
    }
}

impl fmt::Display for ManeuverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested { warning: None } => f.write_str("requested"),
            Self::Requested {
                warning: Some(warning),
            } => write!(f, "awaiting confirmation ({warning})"),
            Self::InProgress { step, of } => write!(f, "in progress (step {}/{of})", step + 1),
            Self::Completed => f.write_str("completed"),
            Self::Aborted(reason) => write!(f, "aborted: {reason}"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Caller's view of a started maneuver.
#[derive(Debug, Clone)]
pub struct ManeuverHandle {
    id: u64,
    kind: ManeuverKind,
    state: watch::Receiver<ManeuverState>,
}

impl ManeuverHandle {
    pub(crate) fn new(id: u64, kind: ManeuverKind, state: watch::Receiver<ManeuverState>) -> Self {
        Self { id, kind, state }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> ManeuverKind {
        self.kind
    }

    pub fn state(&self) -> ManeuverState {
        self.state.borrow().clone()
    }

    /// Wait for a terminal state.
    pub async fn wait(&self) -> ManeuverState {
        let mut rx = self.state.clone();
        let done = rx
            .wait_for(ManeuverState::is_terminal)
            .await
            .map(|state| state.clone());
        match done {
            Ok(state) => state,
            // The sequencer always publishes a terminal state before dropping its sender.
            Err(_) => rx.borrow().clone(),
        }
    }
}
