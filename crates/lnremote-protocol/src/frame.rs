use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::axis::Axis;
use crate::codec::RawFrame;
use crate::error::ProtocolError;
use crate::ids;

/// Status bit: axis is moving.
pub const STATUS_MOVING: u8 = 0x01;
/// Status bit: axis power is on.
pub const STATUS_ENABLED: u8 = 0x02;

const POSITION_REPORT_LEN: usize = 6;

/// A decoded unit sent by the control unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Frame {
    /// The command with this sequence number was accepted.
    CommandAck { seq: u16 },
    /// The command with this sequence number was rejected.
    CommandNack { seq: u16, reason: NackReason },
    /// Current position (micrometers) and status of one axis.
    PositionReport {
        axis: Axis,
        position: f64,
        moving: bool,
        enabled: bool,
    },
    /// Keep-alive.
    Heartbeat,
}

impl Frame {
    /// Sequence number this frame answers, if it is a command response.
    pub fn response_seq(&self) -> Option<u16> {
        match self {
            Frame::CommandAck { seq } | Frame::CommandNack { seq, .. } => Some(*seq),
            _ => None,
        }
    }

    /// True for frames the device sends without being asked for a response.
    pub fn is_notification(&self) -> bool {
        matches!(self, Frame::PositionReport { .. } | Frame::Heartbeat)
    }

    pub(crate) fn to_raw(&self) -> RawFrame {
        match self {
            Frame::CommandAck { seq } => RawFrame::new(ids::ACK, *seq, Bytes::new()),
            Frame::CommandNack { seq, reason } => {
                RawFrame::new(ids::NAK, *seq, vec![reason.code()])
            }
            Frame::PositionReport {
                axis,
                position,
                moving,
                enabled,
            } => {
                let mut payload = BytesMut::with_capacity(POSITION_REPORT_LEN);
                payload.put_u8(axis.address());
                payload.put_f32_le(*position as f32);
                let mut status = 0u8;
                if *moving {
                    status |= STATUS_MOVING;
                }
                if *enabled {
                    status |= STATUS_ENABLED;
                }
                payload.put_u8(status);
                RawFrame::new(ids::POSITION_REPORT, 0, payload.freeze())
            }
            Frame::Heartbeat => RawFrame::new(ids::HEARTBEAT, 0, Bytes::new()),
        }
    }

    pub(crate) fn from_raw(raw: RawFrame) -> Result<Self, ProtocolError> {
        let malformed = ProtocolError::MalformedPayload {
            id: raw.id,
            len: raw.payload.len(),
        };
        match raw.id {
            ids::ACK => Ok(Frame::CommandAck { seq: raw.seq }),
            ids::NAK => {
                let code = raw.payload.first().copied().ok_or(malformed)?;
                Ok(Frame::CommandNack {
                    seq: raw.seq,
                    reason: NackReason::from_code(code),
                })
            }
            ids::POSITION_REPORT => {
                if raw.payload.len() != POSITION_REPORT_LEN {
                    return Err(malformed);
                }
                let p = &raw.payload;
                let axis = Axis::from_address(p[0])?;
                let position = f32::from_le_bytes([p[1], p[2], p[3], p[4]]);
                if !position.is_finite() {
                    return Err(malformed);
                }
                Ok(Frame::PositionReport {
                    axis,
                    position: f64::from(position),
                    moving: p[5] & STATUS_MOVING != 0,
                    enabled: p[5] & STATUS_ENABLED != 0,
                })
            }
            ids::HEARTBEAT => Ok(Frame::Heartbeat),
            other => Err(ProtocolError::UnknownId(other)),
        }
    }
}

/// Why the control unit rejected a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackReason {
    Checksum,
    UnknownCommand,
    InvalidArgument,
    AxisDisabled,
    LimitSwitch,
    Busy,
    Other(u8),
}

impl NackReason {
    /// Wire code.
    pub fn code(self) -> u8 {
        match self {
            NackReason::Checksum => 1,
            NackReason::UnknownCommand => 2,
            NackReason::InvalidArgument => 3,
            NackReason::AxisDisabled => 4,
            NackReason::LimitSwitch => 5,
            NackReason::Busy => 6,
            NackReason::Other(code) => code,
        }
    }

    /// Decode a wire code.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => NackReason::Checksum,
            2 => NackReason::UnknownCommand,
            3 => NackReason::InvalidArgument,
            4 => NackReason::AxisDisabled,
            5 => NackReason::LimitSwitch,
            6 => NackReason::Busy,
            other => NackReason::Other(other),
        }
    }
}

impl fmt::Display for NackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NackReason::Checksum => f.write_str("checksum error"),
            NackReason::UnknownCommand => f.write_str("unknown command"),
            NackReason::InvalidArgument => f.write_str("invalid argument"),
            NackReason::AxisDisabled => f.write_str("axis disabled"),
            NackReason::LimitSwitch => f.write_str("limit switch reached"),
            NackReason::Busy => f.write_str("controller busy"),
            NackReason::Other(code) => write!(f, "error code {code}"),
        }
    }
}
