//! Command and response ids.
//!
//! Command ids follow the SM10 serial protocol command table. Fast and slow
//! variants of a command are distinct ids.

/// Approach absolute position, fast speed mode.
pub const MOVE_ABSOLUTE_FAST: u16 = 0x0048;
/// Approach absolute position, slow speed mode.
pub const MOVE_ABSOLUTE_SLOW: u16 = 0x0049;
/// Approach relative position, fast speed mode.
pub const MOVE_RELATIVE_FAST: u16 = 0x004A;
/// Approach relative position, slow speed mode.
pub const MOVE_RELATIVE_SLOW: u16 = 0x004B;
/// Positioning velocity stage, fast speed mode.
pub const SET_VELOCITY_FAST: u16 = 0x0144;
/// Positioning velocity stage, slow speed mode.
pub const SET_VELOCITY_SLOW: u16 = 0x018F;
/// Positioning speed mode selection.
pub const SET_SPEED_MODE: u16 = 0x0191;
/// Switch axis power off.
pub const AXIS_OFF: u16 = 0x0034;
/// Switch axis power on.
pub const AXIS_ON: u16 = 0x0035;
/// Stop movement.
pub const STOP: u16 = 0x00FF;
/// Read main position counter.
pub const READ_POSITION: u16 = 0x0101;

/// Command accepted.
pub const ACK: u16 = 0x0006;
/// Command rejected; payload carries a reason code.
pub const NAK: u16 = 0x0015;
/// Position report (answer to [`READ_POSITION`], or unsolicited).
pub const POSITION_REPORT: u16 = READ_POSITION;
/// Keep-alive from the control unit.
pub const HEARTBEAT: u16 = 0x0016;

/// Returns a human-readable name for an id.
pub fn id_name(id: u16) -> &'static str {
    match id {
        MOVE_ABSOLUTE_FAST | MOVE_ABSOLUTE_SLOW => "MOVE_ABSOLUTE",
        MOVE_RELATIVE_FAST | MOVE_RELATIVE_SLOW => "MOVE_RELATIVE",
        SET_VELOCITY_FAST | SET_VELOCITY_SLOW => "SET_VELOCITY",
        SET_SPEED_MODE => "SET_SPEED_MODE",
        AXIS_OFF => "AXIS_OFF",
        AXIS_ON => "AXIS_ON",
        STOP => "STOP",
        READ_POSITION => "READ_POSITION",
        ACK => "ACK",
        NAK => "NAK",
        HEARTBEAT => "HEARTBEAT",
        _ => "UNKNOWN",
    }
}
