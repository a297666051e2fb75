use std::marker::PhantomData;

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::codec::{decode_raw, encode_raw, CodecConfig, RawFrame};
use crate::command::Command;
use crate::error::ProtocolError;
use crate::frame::Frame;

const INITIAL_BUFFER_CAPACITY: usize = 256;

/// A message type carried in SM10 units.
///
/// [`Frame`] travels device → host, [`Command`] travels host → device.
pub trait WireMessage: Sized {
    /// Convert to a raw unit.
    fn to_raw(&self) -> RawFrame;
    /// Interpret a checksum-valid raw unit.
    fn from_raw(raw: RawFrame) -> Result<Self, ProtocolError>;
}

impl WireMessage for Frame {
    fn to_raw(&self) -> RawFrame {
        Frame::to_raw(self)
    }

    fn from_raw(raw: RawFrame) -> Result<Self, ProtocolError> {
        Frame::from_raw(raw)
    }
}

impl WireMessage for Command {
    fn to_raw(&self) -> RawFrame {
        Command::to_raw(self)
    }

    fn from_raw(raw: RawFrame) -> Result<Self, ProtocolError> {
        Command::from_raw(raw)
    }
}

/// Encode any message into `dst`.
pub fn encode_message<M: WireMessage>(msg: &M, config: &CodecConfig, dst: &mut BytesMut) {
    encode_raw(&msg.to_raw(), config, dst);
}

/// Encode a command into a standalone byte sequence.
pub fn encode_command(cmd: &Command, config: &CodecConfig) -> Bytes {
    let mut buf = BytesMut::with_capacity(config.wire_size(5));
    encode_message(cmd, config, &mut buf);
    buf.freeze()
}

fn next_message<M: WireMessage>(
    src: &mut BytesMut,
    config: &CodecConfig,
) -> Option<Result<M, ProtocolError>> {
    let result = decode_raw(src, config)?.and_then(M::from_raw);
    if let Err(err) = &result {
        warn!(error = %err, "discarding unit");
    }
    Some(result)
}

/// Resumable decoder over arbitrarily chunked input.
///
/// Retains a residual buffer between calls and only yields a message once a
/// complete, checksum-valid unit is present. The sequence of results does not
/// depend on how the input was split.
#[derive(Debug)]
pub struct FrameDecoder<M = Frame> {
    buf: BytesMut,
    config: CodecConfig,
    _message: PhantomData<fn() -> M>,
}

impl<M: WireMessage> FrameDecoder<M> {
    /// Create a decoder with default framing.
    pub fn new() -> Self {
        Self::with_config(CodecConfig::default())
    }

    /// Create a decoder with explicit framing.
    pub fn with_config(config: CodecConfig) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
            _message: PhantomData,
        }
    }

    /// Feed `chunk` and return every message completed by it, in order.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<Result<M, ProtocolError>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(result) = next_message(&mut self.buf, &self.config) {
            out.push(result);
        }
        out
    }

    /// Bytes held back waiting for the rest of a unit.
    pub fn residual(&self) -> &[u8] {
        &self.buf
    }

    /// Current framing configuration.
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }
}

impl<M: WireMessage> Default for FrameDecoder<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// `tokio_util` codec decoding `D` and encoding any [`WireMessage`].
///
/// Protocol errors are yielded as items (`Ok(Err(..))`) so a corrupt unit
/// never terminates a `FramedRead`.
#[derive(Debug, Clone)]
pub struct Sm10Codec<D> {
    config: CodecConfig,
    _decode: PhantomData<fn() -> D>,
}

/// Host side: decodes device frames, encodes commands.
pub type HostCodec = Sm10Codec<Frame>;

/// Device side: decodes commands, encodes frames.
pub type DeviceCodec = Sm10Codec<Command>;

impl<D> Sm10Codec<D> {
    /// Create a codec with explicit framing.
    pub fn new(config: CodecConfig) -> Self {
        Self {
            config,
            _decode: PhantomData,
        }
    }
}

impl<D> Default for Sm10Codec<D> {
    fn default() -> Self {
        Self::new(CodecConfig::default())
    }
}

impl<D: WireMessage> Decoder for Sm10Codec<D> {
    type Item = Result<D, ProtocolError>;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(next_message(src, &self.config))
    }
}

impl<D, E: WireMessage> Encoder<E> for Sm10Codec<D> {
    type Error = std::io::Error;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_message(&item, &self.config, dst);
        Ok(())
    }
}
