//! # Envelope Codec and Wire Framing
//!
//! The codec layer owns both halves of the wire format:
//!
//! 1. **Encoding**: a [`Codec`] turns an [`Envelope`] into payload bytes and back.
//!    [`JsonCodec`] is the stock implementation.
//! 2. **Framing**: every payload travels as one length-prefixed frame so message
//!    boundaries survive TCP's stream semantics:
//!
//! ```text
//! [4 bytes: payload length, big-endian u32] [N bytes: payload]
//! ```
//!
//! Frames above a configured maximum are refused on both the write and the read
//! side, so a corrupt or hostile length prefix cannot force a huge allocation.

use bytes::{Buf, Bytes, BytesMut};

use super::error::{CodecError, FrameError};
use super::messages::Envelope;

/// Size of the big-endian length prefix in front of every payload.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Default maximum payload size (16 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Converts envelopes to and from payload bytes.
///
/// Implementations must be symmetric: `decode(encode(v)) == v` for every
/// envelope they accept.
pub trait Codec: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    fn encode(&self, value: &Envelope) -> Result<Vec<u8>, CodecError>;

    /// Fails with [`CodecError::Decode`] when `bytes` is not a valid envelope.
    fn decode(&self, bytes: &[u8]) -> Result<Envelope, CodecError>;
}

/// UTF-8 JSON documents, one per frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &Envelope) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Prepend the length prefix to `payload`.
pub fn encode_frame(payload: &[u8], max_frame_bytes: usize) -> Result<Vec<u8>, FrameError> {
    let len = payload.len();
    if len > max_frame_bytes || len > u32::MAX as usize {
        return Err(FrameError::TooLarge {
            len,
            max: max_frame_bytes,
        });
    }

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_LEN + len);
    frame.extend_from_slice(&(len as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Split one complete frame off the front of `buf`.
///
/// Returns `Ok(None)` while the buffer holds only part of a frame; the caller
/// reads more bytes and tries again. Consumed bytes are removed from `buf`,
/// anything after the frame is left for the next call.
pub fn decode_frame(buf: &mut BytesMut, max_frame_bytes: usize) -> Result<Option<Bytes>, FrameError> {
    if buf.len() < LENGTH_PREFIX_LEN {
        return Ok(None);
    }

    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    prefix.copy_from_slice(&buf[..LENGTH_PREFIX_LEN]);
    let len = u32::from_be_bytes(prefix) as usize;

    if len > max_frame_bytes {
        return Err(FrameError::TooLarge {
            len,
            max: max_frame_bytes,
        });
    }

    if buf.len() < LENGTH_PREFIX_LEN + len {
        buf.reserve(LENGTH_PREFIX_LEN + len - buf.len());
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_LEN);
    Ok(Some(buf.split_to(len).freeze()))
}
