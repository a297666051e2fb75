use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::checksum::Checksum;
use crate::error::ProtocolError;

/// Unit header: sync (1) + id (2) + seq (2) + length (1) = 6 bytes.
pub const HEADER_SIZE: usize = 6;

/// SYN, the SM10 command start character.
pub const DEFAULT_SYNC: u8 = 0x16;

/// Carriage return.
pub const DEFAULT_TERMINATOR: u8 = 0x0D;

/// Default maximum payload size. SM10 units never carry more than a few floats.
pub const DEFAULT_MAX_PAYLOAD: usize = 64;

/// Framing parameters.
///
/// The start byte, terminator and checksum scheme vary between firmware
/// revisions, so they are configuration rather than constants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecConfig {
    /// Byte that starts every unit.
    pub sync: u8,
    /// Byte that ends every unit.
    pub terminator: u8,
    /// Checksum scheme over id..payload.
    pub checksum: Checksum,
    /// Largest payload accepted by the decoder.
    pub max_payload: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            sync: DEFAULT_SYNC,
            terminator: DEFAULT_TERMINATOR,
            checksum: Checksum::default(),
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl CodecConfig {
    /// Total wire size of a unit with `payload_len` payload bytes.
    pub fn wire_size(&self, payload_len: usize) -> usize {
        HEADER_SIZE + payload_len + self.checksum.len() + 1
    }
}

/// One checksum-valid unit, before interpretation of its id and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Command or response id.
    pub id: u16,
    /// Sequence number (zero for unsolicited units).
    pub seq: u16,
    /// Unit payload.
    pub payload: Bytes,
}

impl RawFrame {
    /// Create a new raw unit.
    pub fn new(id: u16, seq: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            seq,
            payload: payload.into(),
        }
    }
}

/// Encode a unit into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────┬──────────┬──────────┬──────┬─────────────┬───────────┬──────┐
/// │ SYN  │ ID       │ SEQ      │ LEN  │ PAYLOAD     │ CHECKSUM  │ TERM │
/// │ (1B) │ (2B BE)  │ (2B BE)  │ (1B) │ (LEN bytes) │ (0-2B BE) │ (1B) │
/// └──────┴──────────┴──────────┴──────┴─────────────┴───────────┴──────┘
/// ```
///
/// Payloads longer than 255 bytes cannot be expressed and are truncated by
/// the length byte; callers only ever build short payloads.
pub fn encode_raw(frame: &RawFrame, config: &CodecConfig, dst: &mut BytesMut) {
    let len = frame.payload.len().min(usize::from(u8::MAX));
    let payload = &frame.payload[..len];

    dst.reserve(config.wire_size(len));
    dst.put_u8(config.sync);
    let body_start = dst.len();
    dst.put_u16(frame.id);
    dst.put_u16(frame.seq);
    dst.put_u8(len as u8);
    dst.put_slice(payload);

    let body = dst[body_start..].to_vec();
    config.checksum.write(&body, dst);
    dst.put_u8(config.terminator);
}

/// Decode the next unit from a buffer.
///
/// Returns `None` if the buffer doesn't contain a complete unit yet. Bytes
/// before the next sync byte are dropped. A corrupt unit is consumed and
/// reported as `Some(Err(..))`; calling again continues with the following
/// bytes, so a stream is never abandoned because of one bad unit.
pub fn decode_raw(src: &mut BytesMut, config: &CodecConfig) -> Option<Result<RawFrame, ProtocolError>> {
    match src.iter().position(|&b| b == config.sync) {
        Some(0) => {}
        Some(skip) => {
            debug!(skipped = skip, "discarding bytes before frame start");
            src.advance(skip);
        }
        None => {
            if !src.is_empty() {
                debug!(skipped = src.len(), "discarding bytes without frame start");
                src.clear();
            }
            return None;
        }
    }

    if src.len() < HEADER_SIZE {
        return None; // Need more data
    }

    let id = u16::from_be_bytes([src[1], src[2]]);
    let seq = u16::from_be_bytes([src[3], src[4]]);
    let len = usize::from(src[5]);

    if len > config.max_payload {
        src.advance(1);
        return Some(Err(ProtocolError::PayloadTooLarge {
            len,
            max: config.max_payload,
        }));
    }

    let total = config.wire_size(len);
    if src.len() < total {
        return None; // Need more data
    }

    let found = src[total - 1];
    if found != config.terminator {
        // The length byte was probably garbage; rescan from the next byte.
        src.advance(1);
        return Some(Err(ProtocolError::MissingTerminator { found }));
    }

    let body_end = HEADER_SIZE + len;
    let expected = config.checksum.compute(&src[1..body_end]);
    let actual = config
        .checksum
        .read(&src[body_end..body_end + config.checksum.len()]);
    if expected != actual {
        src.advance(total);
        return Some(Err(ProtocolError::ChecksumMismatch { expected, actual }));
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(len).freeze();
    src.advance(config.checksum.len() + 1);
    trace!(id, seq, len, "decoded unit");

    Some(Ok(RawFrame { id, seq, payload }))
}
