//! Error taxonomy for the network engine
//!
//! Every failure is scoped to a single connection. The selector loops catch
//! these at the iteration boundary, so no error here can take down a loop
//! thread or affect another peer.

use std::io;
use thiserror::Error;

/// Errors raised while framing, decoding, encoding or executing packets.
#[derive(Debug, Error)]
pub enum PacketError {
    /// A field read needed more bytes than the frame still holds.
    ///
    /// Treated as a corrupt frame: the connection is closed.
    #[error("buffer underflow: needed {needed} bytes, {remaining} remaining")]
    BufferUnderflow { needed: usize, remaining: usize },

    /// The opcode was recognized but the payload is malformed.
    #[error("malformed payload: {0}")]
    Decode(String),

    /// No decoder is registered for this opcode sequence.
    #[error("unknown opcode 0x{opcode:02X} (extended: {extended:?})")]
    UnknownOpcode { opcode: u8, extended: Option<u8> },

    /// Application logic failed while executing a packet.
    ///
    /// Logged and isolated; the connection stays open.
    #[error("execution failed: {0}")]
    Execution(String),

    /// Zero-length or oversized frame, or a send that cannot be framed.
    ///
    /// The connection is closed immediately.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Socket-level failure during read or write.
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),
}

impl PacketError {
    pub(crate) fn underflow(needed: usize, remaining: usize) -> Self {
        PacketError::BufferUnderflow { needed, remaining }
    }
}
