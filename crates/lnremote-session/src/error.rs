use std::time::Duration;

use lnremote_protocol::NackReason;
use lnremote_transport::TransportError;

/// Errors surfaced to callers of [`Session::send`](crate::Session::send).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No ACK/NAK arrived within the command timeout. The command is not retried.
    #[error("command #{seq} timed out after {after:?}")]
    Timeout { seq: u16, after: Duration },

    /// The transport is gone; outstanding commands were failed.
    #[error("session disconnected")]
    Disconnected,

    /// The device answered with a NAK.
    #[error("command #{seq} rejected by device: {reason}")]
    Rejected { seq: u16, reason: NackReason },

    /// `reconnect()` on a session created from a raw stream.
    #[error("session has no endpoint to reconnect to")]
    NotReconnectable,

    /// Opening the transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// Whether the error means the link is down rather than the command failed.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
