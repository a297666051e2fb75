//! Motion control core for a three-axis micromanipulator.
//!
//! - [`AxisTracker`] reconciles device position reports with optimistic
//!   updates made when commands are issued.
//! - [`safety`] decides whether a maneuver or a step may run.
//! - [`Manipulator`] is the outbound API: primitive axis commands plus the
//!   compound Approach, Retract, Move Away and Return maneuvers, at most one
//!   of which is active at a time.

pub mod config;
pub mod error;
pub mod maneuver;
pub mod manipulator;
pub mod safety;
pub mod tracker;

pub use config::{MotionConfig, TrackerConfig};
pub use error::{MotionError, Result};
pub use maneuver::{ManeuverHandle, ManeuverKind, ManeuverState, ManeuverStep, StepTarget};
pub use manipulator::{Manipulator, Poller};
pub use safety::{evaluate, evaluate_step, is_inside_sample, SafetyLimits, SafetyVerdict};
pub use tracker::{AxisState, AxisTracker, StaleStateWarning, TrackedState};
