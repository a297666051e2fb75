//! Remote control of Luigs & Neumann micromanipulators.
//!
//! # Crate Structure
//!
//! - [`transport`]: serial, TCP and in-memory byte streams
//! - [`protocol`]: SM10 command framing and response decoding
//! - [`session`]: request/response session, notifications, simulated device
//! - [`motion`]: axis tracking, safety policy and compound maneuvers

/// Re-export transport types.
pub mod transport {
    pub use lnremote_transport::*;
}

/// Re-export protocol types.
pub mod protocol {
    pub use lnremote_protocol::*;
}

/// Re-export session types.
pub mod session {
    pub use lnremote_session::*;
}

/// Re-export motion types.
pub mod motion {
    pub use lnremote_motion::*;
}

pub use lnremote_motion::{Manipulator, MotionConfig};
pub use lnremote_protocol::{Axis, SpeedMode};
pub use lnremote_session::{Session, SessionConfig};
pub use lnremote_transport::Endpoint;
