//! Length-prefixed wire framing
//!
//! Each frame on the wire is a 2-byte unsigned little-endian length prefix
//! (byte count of the payload, prefix excluded) followed by the payload.
//! The first payload byte is the primary opcode.
//!
//! Framing is driven from a per-connection accumulation buffer: bytes are
//! appended as they arrive and complete frames are split off the front.
//! A single read event may yield zero, one or many frames.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::PacketError;

/// Size of the length prefix preceding every payload.
pub const FRAME_PREFIX_LEN: usize = 2;

/// Attempts to split one complete frame payload off the front of `buf`.
///
/// Returns `Ok(None)` while the buffer holds less than a full frame.
/// The prefix is not consumed until the whole frame is confirmed present.
///
/// A declared length of zero or above `max_frame` is a protocol violation:
/// the caller must close the connection without further processing.
pub fn extract_frame(buf: &mut BytesMut, max_frame: usize) -> Result<Option<Bytes>, PacketError> {
    if buf.len() < FRAME_PREFIX_LEN {
        return Ok(None);
    }

    let declared = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    if declared == 0 {
        return Err(PacketError::ProtocolViolation(
            "zero-length frame".to_string(),
        ));
    }
    if declared > max_frame {
        return Err(PacketError::ProtocolViolation(format!(
            "frame of {declared} bytes exceeds the {max_frame} byte limit"
        )));
    }

    if buf.len() - FRAME_PREFIX_LEN < declared {
        // Wait for more data.
        return Ok(None);
    }

    buf.advance(FRAME_PREFIX_LEN);
    Ok(Some(buf.split_to(declared).freeze()))
}

/// Wraps an encoded payload in a length prefix, ready for the send queue.
pub fn frame(payload: &[u8], max_frame: usize) -> Result<Bytes, PacketError> {
    if payload.is_empty() {
        return Err(PacketError::ProtocolViolation(
            "cannot send an empty payload".to_string(),
        ));
    }
    if payload.len() > max_frame || payload.len() > u16::MAX as usize {
        return Err(PacketError::ProtocolViolation(format!(
            "outbound payload of {} bytes exceeds the {} byte limit",
            payload.len(),
            max_frame.min(u16::MAX as usize)
        )));
    }

    let mut framed = BytesMut::with_capacity(FRAME_PREFIX_LEN + payload.len());
    framed.put_u16_le(payload.len() as u16);
    framed.put_slice(payload);
    Ok(framed.freeze())
}
