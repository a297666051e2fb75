use lnremote_protocol::Axis;
use lnremote_session::SessionError;

/// Errors returned by [`Manipulator`](crate::Manipulator) operations.
///
/// A maneuver rejected with one of these was never started.
#[derive(Debug, thiserror::Error)]
pub enum MotionError {
    /// Another maneuver is active.
    #[error("another maneuver is active")]
    Busy,

    /// The axis is still moving from a previous command.
    #[error("axis {0} is moving")]
    AxisMoving(Axis),

    #[error("target {target}um on axis {axis} is outside [{min}, {max}]")]
    LimitExceeded {
        axis: Axis,
        target: f64,
        min: f64,
        max: f64,
    },

    /// The safety policy refused.
    #[error("blocked: {0}")]
    Blocked(String),

    #[error("velocity stage {0} is outside 1..=15")]
    InvalidVelocity(u8),

    #[error("no surface reference set")]
    NoSurfaceReference,

    /// Polled axes did not report back in time.
    #[error("no position report within {after:?}")]
    NoReport { after: std::time::Duration },

    /// Confirmation for a maneuver that is not waiting for one.
    #[error("maneuver is not awaiting confirmation")]
    NotAwaitingConfirmation,

    #[error(transparent)]
    Session(#[from] SessionError),
}

pub type Result<T> = std::result::Result<T, MotionError>;
