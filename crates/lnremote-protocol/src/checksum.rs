use crc::{Crc, CRC_16_MODBUS, CRC_16_XMODEM};

const XMODEM: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);
const MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Checksum appended to every unit, over id..payload.
///
/// The SM10 uses CRC-16 with polynomial 0x1021 and a zero initial value
/// (CRC-16/XMODEM), sent MSB first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Checksum {
    #[default]
    Crc16Xmodem,
    Crc16Modbus,
    Xor8,
    None,
}

impl Checksum {
    /// Number of checksum bytes on the wire.
    pub fn len(self) -> usize {
        match self {
            Checksum::Crc16Xmodem | Checksum::Crc16Modbus => 2,
            Checksum::Xor8 => 1,
            Checksum::None => 0,
        }
    }

    /// True when no checksum is carried.
    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Compute the checksum of `data`.
    pub fn compute(self, data: &[u8]) -> u16 {
        match self {
            Checksum::Crc16Xmodem => XMODEM.checksum(data),
            Checksum::Crc16Modbus => MODBUS.checksum(data),
            Checksum::Xor8 => u16::from(data.iter().fold(0u8, |acc, &b| acc ^ b)),
            Checksum::None => 0,
        }
    }

    /// Read a checksum value back from its wire bytes.
    pub fn read(self, bytes: &[u8]) -> u16 {
        match self.len() {
            2 => u16::from_be_bytes([bytes[0], bytes[1]]),
            1 => u16::from(bytes[0]),
            _ => 0,
        }
    }

    /// Append the checksum of `data` to `dst` in wire order.
    pub fn write(self, data: &[u8], dst: &mut impl bytes::BufMut) {
        let value = self.compute(data);
        match self.len() {
            2 => dst.put_u16(value),
            1 => dst.put_u8(value as u8),
            _ => {}
        }
    }
}
