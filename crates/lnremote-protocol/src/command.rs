use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::axis::{Axis, SpeedMode};
use crate::codec::RawFrame;
use crate::error::ProtocolError;
use crate::ids;

/// What a command asks an axis to do.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandKind {
    /// Approach an absolute position (micrometers).
    MoveAbsolute { target: f64, mode: SpeedMode },
    /// Approach a position relative to the current one (micrometers).
    MoveRelative { delta: f64, mode: SpeedMode },
    /// Set the positioning velocity stage (1-15) used by `mode`.
    SetVelocity { mode: SpeedMode, stage: u8 },
    /// Select the positioning speed mode.
    SetSpeedMode(SpeedMode),
    /// Switch axis power on.
    Enable,
    /// Switch axis power off.
    Disable,
    /// Stop any movement.
    Stop,
    /// Request a position report.
    Poll,
}

impl CommandKind {
    /// True for commands that start motion.
    pub fn is_motion(&self) -> bool {
        matches!(
            self,
            CommandKind::MoveAbsolute { .. } | CommandKind::MoveRelative { .. }
        )
    }

    /// Wire id of this command.
    pub fn id(&self) -> u16 {
        match self {
            CommandKind::MoveAbsolute {
                mode: SpeedMode::Fast,
                ..
            } => ids::MOVE_ABSOLUTE_FAST,
            CommandKind::MoveAbsolute {
                mode: SpeedMode::Slow,
                ..
            } => ids::MOVE_ABSOLUTE_SLOW,
            CommandKind::MoveRelative {
                mode: SpeedMode::Fast,
                ..
            } => ids::MOVE_RELATIVE_FAST,
            CommandKind::MoveRelative {
                mode: SpeedMode::Slow,
                ..
            } => ids::MOVE_RELATIVE_SLOW,
            CommandKind::SetVelocity {
                mode: SpeedMode::Fast,
                ..
            } => ids::SET_VELOCITY_FAST,
            CommandKind::SetVelocity {
                mode: SpeedMode::Slow,
                ..
            } => ids::SET_VELOCITY_SLOW,
            CommandKind::SetSpeedMode(_) => ids::SET_SPEED_MODE,
            CommandKind::Enable => ids::AXIS_ON,
            CommandKind::Disable => ids::AXIS_OFF,
            CommandKind::Stop => ids::STOP,
            CommandKind::Poll => ids::READ_POSITION,
        }
    }
}

/// A typed request for one axis.
///
/// `seq` is assigned by the session when the command is sent; responses are
/// correlated by it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Command {
    pub seq: u16,
    pub axis: Axis,
    pub kind: CommandKind,
}

impl Command {
    /// Create a command with sequence number zero.
    pub fn new(axis: Axis, kind: CommandKind) -> Self {
        Self { seq: 0, axis, kind }
    }

    /// Return a copy carrying `seq`.
    pub fn with_seq(mut self, seq: u16) -> Self {
        self.seq = seq;
        self
    }

    pub(crate) fn to_raw(&self) -> RawFrame {
        let mut payload = BytesMut::with_capacity(5);
        payload.put_u8(self.axis.address());
        match self.kind {
            CommandKind::MoveAbsolute { target: value, .. }
            | CommandKind::MoveRelative { delta: value, .. } => {
                payload.put_f32_le(value as f32);
            }
            CommandKind::SetVelocity { stage, .. } => payload.put_u8(stage),
            CommandKind::SetSpeedMode(mode) => payload.put_u8(mode.code()),
            CommandKind::Enable | CommandKind::Disable | CommandKind::Stop | CommandKind::Poll => {}
        }
        RawFrame::new(self.kind.id(), self.seq, payload.freeze())
    }

    pub(crate) fn from_raw(raw: RawFrame) -> Result<Self, ProtocolError> {
        let malformed = ProtocolError::MalformedPayload {
            id: raw.id,
            len: raw.payload.len(),
        };
        let p: &Bytes = &raw.payload;
        let axis = Axis::from_address(*p.first().ok_or(malformed.clone())?)?;

        let float = |p: &Bytes| -> Result<f64, ProtocolError> {
            if p.len() != 5 {
                return Err(malformed.clone());
            }
            Ok(f64::from(f32::from_le_bytes([p[1], p[2], p[3], p[4]])))
        };
        let byte = |p: &Bytes| -> Result<u8, ProtocolError> {
            if p.len() != 2 {
                return Err(malformed.clone());
            }
            Ok(p[1])
        };
        let bare = |p: &Bytes| -> Result<(), ProtocolError> {
            if p.len() != 1 {
                return Err(malformed.clone());
            }
            Ok(())
        };

        let kind = match raw.id {
            ids::MOVE_ABSOLUTE_FAST => CommandKind::MoveAbsolute {
                target: float(p)?,
                mode: SpeedMode::Fast,
            },
            ids::MOVE_ABSOLUTE_SLOW => CommandKind::MoveAbsolute {
                target: float(p)?,
                mode: SpeedMode::Slow,
            },
            ids::MOVE_RELATIVE_FAST => CommandKind::MoveRelative {
                delta: float(p)?,
                mode: SpeedMode::Fast,
            },
            ids::MOVE_RELATIVE_SLOW => CommandKind::MoveRelative {
                delta: float(p)?,
                mode: SpeedMode::Slow,
            },
            ids::SET_VELOCITY_FAST => CommandKind::SetVelocity {
                mode: SpeedMode::Fast,
                stage: byte(p)?,
            },
            ids::SET_VELOCITY_SLOW => CommandKind::SetVelocity {
                mode: SpeedMode::Slow,
                stage: byte(p)?,
            },
            ids::SET_SPEED_MODE => CommandKind::SetSpeedMode(SpeedMode::from_code(byte(p)?)),
            ids::AXIS_ON => {
                bare(p)?;
                CommandKind::Enable
            }
            ids::AXIS_OFF => {
                bare(p)?;
                CommandKind::Disable
            }
            ids::STOP => {
                bare(p)?;
                CommandKind::Stop
            }
            ids::READ_POSITION => {
                bare(p)?;
                CommandKind::Poll
            }
            other => return Err(ProtocolError::UnknownId(other)),
        };

        Ok(Command {
            seq: raw.seq,
            axis,
            kind,
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} {}", self.seq, self.axis, ids::id_name(self.kind.id()))?;
        match self.kind {
            CommandKind::MoveAbsolute { target, mode } => write!(f, " {target:.2}um ({mode})"),
            CommandKind::MoveRelative { delta, mode } => write!(f, " {delta:+.2}um ({mode})"),
            CommandKind::SetVelocity { mode, stage } => write!(f, " stage {stage} ({mode})"),
            CommandKind::SetSpeedMode(mode) => write!(f, " {mode}"),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_absolute_payload() {
        let cmd = Command::new(
            Axis::X,
            CommandKind::MoveAbsolute {
                target: 100.0,
                mode: SpeedMode::Slow,
            },
        )
        .with_seq(7);
        let raw = cmd.to_raw();

        assert_eq!(raw.id, ids::MOVE_ABSOLUTE_SLOW);
        assert_eq!(raw.seq, 7);
        assert_eq!(raw.payload.as_ref(), &[0x01, 0x00, 0x00, 0xC8, 0x42]);
    }

    #[test]
    fn every_kind_survives_the_wire() {
        let kinds = [
            CommandKind::MoveAbsolute {
                target: -250.5,
                mode: SpeedMode::Fast,
            },
            CommandKind::MoveRelative {
                delta: 3.25,
                mode: SpeedMode::Slow,
            },
            CommandKind::SetVelocity {
                mode: SpeedMode::Fast,
                stage: 8,
            },
            CommandKind::SetSpeedMode(SpeedMode::Fast),
            CommandKind::Enable,
            CommandKind::Disable,
            CommandKind::Stop,
            CommandKind::Poll,
        ];
        for kind in kinds {
            let cmd = Command::new(Axis::Z, kind).with_seq(11);
            assert_eq!(Command::from_raw(cmd.to_raw()).unwrap(), cmd);
        }
    }

    #[test]
    fn stop_with_extra_bytes_is_malformed() {
        let raw = RawFrame::new(ids::STOP, 1, vec![1, 2]);
        assert!(matches!(
            Command::from_raw(raw),
            Err(ProtocolError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn display_is_readable() {
        let cmd = Command::new(
            Axis::Y,
            CommandKind::MoveRelative {
                delta: -5.0,
                mode: SpeedMode::Slow,
            },
        )
        .with_seq(3);
        assert_eq!(cmd.to_string(), "#3 Y MOVE_RELATIVE -5.00um (slow)");
    }

    #[test]
    fn only_moves_are_motion() {
        assert!(CommandKind::MoveRelative {
            delta: 1.0,
            mode: SpeedMode::Fast
        }
        .is_motion());
        assert!(!CommandKind::Stop.is_motion());
        assert!(!CommandKind::Poll.is_motion());
    }
}
