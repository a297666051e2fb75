use std::time::Duration;

use lnremote_protocol::{Axis, SpeedMode};

use crate::safety::SafetyLimits;

/// Staleness detection.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// A moving axis with no report for this long is stale.
    pub stale_after: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(1),
        }
    }
}

/// Sequencer tuning.
#[derive(Debug, Clone)]
pub struct MotionConfig {
    /// A step is complete once the axis is idle within this distance (µm) of its target.
    pub position_tolerance: f64,
    /// Upper bound on waiting for one step to settle.
    pub settle_timeout: Duration,
    /// Poll period while waiting for a step to settle.
    pub poll_interval: Duration,
    pub approach_speed: SpeedMode,
    pub retract_speed: SpeedMode,
    /// Speed of Move Away's lateral phase and of Return.
    pub lateral_speed: SpeedMode,
    /// Axis used for Move Away's lateral withdrawal.
    pub lateral_axis: Axis,
    /// Lateral withdrawal distance (µm).
    pub move_away_offset: f64,
    pub tracker: TrackerConfig,
    pub limits: SafetyLimits,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            position_tolerance: 0.5,
            settle_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(250),
            approach_speed: SpeedMode::Slow,
            retract_speed: SpeedMode::Slow,
            lateral_speed: SpeedMode::Fast,
            lateral_axis: Axis::Y,
            move_away_offset: 10_000.0,
            tracker: TrackerConfig::default(),
            limits: SafetyLimits::default(),
        }
    }
}
