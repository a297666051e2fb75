use std::fmt;

use crate::error::ProtocolError;

/// One translation stage of the manipulator.
///
/// X is the approach (depth) axis on a standard SM10 rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    /// All axes, in device address order.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Device address of this axis on control unit 1.
    pub fn address(self) -> u8 {
        match self {
            Axis::X => 1,
            Axis::Y => 2,
            Axis::Z => 3,
        }
    }

    /// Map a device address back to an axis.
    pub fn from_address(address: u8) -> Result<Self, ProtocolError> {
        match address {
            1 => Ok(Axis::X),
            2 => Ok(Axis::Y),
            3 => Ok(Axis::Z),
            other => Err(ProtocolError::UnknownAxis(other)),
        }
    }

    /// Index into per-axis arrays.
    pub fn index(self) -> usize {
        usize::from(self.address() - 1)
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Axis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x" | "1" => Ok(Axis::X),
            "y" | "2" => Ok(Axis::Y),
            "z" | "3" => Ok(Axis::Z),
            other => Err(format!("unknown axis '{other}' (expected x, y or z)")),
        }
    }
}

/// Positioning speed mode. The control unit keeps one velocity stage per mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SpeedMode {
    #[default]
    Slow,
    Fast,
}

impl SpeedMode {
    /// Wire encoding.
    pub fn code(self) -> u8 {
        match self {
            SpeedMode::Slow => 0,
            SpeedMode::Fast => 1,
        }
    }

    /// Decode the wire encoding. Anything nonzero selects fast.
    pub fn from_code(code: u8) -> Self {
        if code == 0 {
            SpeedMode::Slow
        } else {
            SpeedMode::Fast
        }
    }
}

impl fmt::Display for SpeedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeedMode::Slow => f.write_str("slow"),
            SpeedMode::Fast => f.write_str("fast"),
        }
    }
}

impl std::str::FromStr for SpeedMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slow" | "0" => Ok(SpeedMode::Slow),
            "fast" | "1" => Ok(SpeedMode::Fast),
            other => Err(format!("unknown speed mode '{other}' (expected slow or fast)")),
        }
    }
}
