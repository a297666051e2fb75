//! Asynchronous request/response session with an SM10 control unit.
//!
//! A [`Session`] owns one transport stream and its codec. Commands are
//! correlated with their ACK/NAK by sequence number; unsolicited position
//! reports and heartbeats are delivered to registered [`FrameObserver`]s in
//! arrival order and broadcast to [`Notifications`] subscribers.
//!
//! A transport failure moves the session to [`SessionState::Disconnected`]
//! and fails every outstanding command. Reconnection is always explicit.

pub mod config;
pub mod error;
pub mod notify;
pub mod session;
pub mod sim;

pub use config::SessionConfig;
pub use error::{Result, SessionError};
pub use notify::{FrameObserver, Notifications};
pub use session::{Ack, Session, SessionState};
pub use sim::{SimConfig, SimulatedDevice};
