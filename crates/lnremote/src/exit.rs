use std::fmt;
use std::io;

use lnremote::motion::MotionError;
use lnremote::session::SessionError;
use lnremote::transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const HEALTH_CHECK_FAILED: i32 = 30;
/// A maneuver was blocked or needs a confirmation that was not given.
pub const SAFETY_CHECK_FAILED: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::NotFound => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Connect { source, .. } | TransportError::Io(source) => {
            io_error(context, source)
        }
        TransportError::ConnectTimeout { .. } => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        TransportError::SerialUnsupported => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn session_error(context: &str, err: SessionError) -> CliError {
    match err {
        SessionError::Transport(err) => transport_error(context, err),
        SessionError::Timeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        SessionError::Disconnected => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        SessionError::Rejected { .. } => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn motion_error(context: &str, err: MotionError) -> CliError {
    match err {
        MotionError::Session(err) => session_error(context, err),
        MotionError::Blocked(_) => CliError::new(SAFETY_CHECK_FAILED, format!("{context}: {err}")),
        MotionError::LimitExceeded { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        MotionError::InvalidVelocity(_) | MotionError::NoSurfaceReference => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        MotionError::NoReport { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        MotionError::Busy | MotionError::AxisMoving(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}
