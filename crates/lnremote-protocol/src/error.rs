/// Errors that can occur while decoding units from the wire.
///
/// All of these are recoverable: the decoder discards the offending bytes and
/// keeps going.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The checksum carried by the unit does not match its contents.
    #[error("checksum mismatch (expected {expected:#06x}, got {actual:#06x})")]
    ChecksumMismatch { expected: u16, actual: u16 },

    /// The byte where the terminator should be holds something else.
    #[error("missing frame terminator (found {found:#04x})")]
    MissingTerminator { found: u8 },

    /// The length byte exceeds the configured maximum payload.
    #[error("payload too large ({len} bytes, max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    /// The id is not a known command or response.
    #[error("unknown id {0:#06x}")]
    UnknownId(u16),

    /// The payload length does not fit the id.
    #[error("malformed payload for id {id:#06x} ({len} bytes)")]
    MalformedPayload { id: u16, len: usize },

    /// An axis address outside the supported range.
    #[error("unknown axis address {0}")]
    UnknownAxis(u8),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
