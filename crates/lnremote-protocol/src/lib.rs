//! Command framing and response decoding for Luigs & Neumann SM10 control units.
//!
//! Every unit on the wire, in either direction, is framed as:
//! - A sync byte (`0x16`, SYN) marking a plausible frame start
//! - A 2-byte big-endian command or response id
//! - A 2-byte big-endian sequence number for request/response correlation
//! - A 1-byte payload length and the payload itself
//! - A checksum over id..payload (CRC-16/XMODEM by default)
//! - A terminator byte
//!
//! Decoding is resumable across arbitrary read boundaries and resynchronizes
//! after corrupt units instead of aborting the stream.

pub mod axis;
pub mod checksum;
pub mod codec;
pub mod command;
pub mod decoder;
pub mod error;
pub mod frame;
pub mod ids;

pub use axis::{Axis, SpeedMode};
pub use checksum::Checksum;
pub use codec::{decode_raw, encode_raw, CodecConfig, RawFrame, HEADER_SIZE};
pub use command::{Command, CommandKind};
pub use decoder::{
    encode_command, encode_message, DeviceCodec, FrameDecoder, HostCodec, Sm10Codec, WireMessage,
};
pub use error::{ProtocolError, Result};
pub use frame::{Frame, NackReason};
