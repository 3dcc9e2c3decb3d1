//! Per-peer connection state
//!
//! A [`Connection`] is created by the accept loop and lives until its
//! channel closes: graceful end-of-queue close, flood rejection, I/O
//! error or controller shutdown. The receive buffer is touched only by
//! the read loop that owns the socket's readiness events; the send queue
//! may be appended to by any thread but is drained only by a write loop.

use std::collections::VecDeque;
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use mio::net::TcpStream;
use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::buffer::PacketWriter;
use crate::error::PacketError;
use crate::framing;
use crate::packet::OutboundPacket;

const RECV_BUFFER_CAPACITY: usize = 8 * 1024;

/// Identifier of a live connection; doubles as its selector token.
pub type ConnId = usize;

/// FIFO of pending outbound byte blocks, delivered in enqueue order.
/// `offset` tracks how much of the head block has already been written.
pub(crate) struct SendQueue {
    pub(crate) blocks: VecDeque<Bytes>,
    pub(crate) offset: usize,
}

impl SendQueue {
    fn new() -> Self {
        SendQueue {
            blocks: VecDeque::new(),
            offset: 0,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// One accepted peer socket plus everything the engine tracks for it.
///
/// `S` is the application-defined state carried as an opaque payload;
/// packet handlers read and mutate it through [`Connection::state`].
pub struct Connection<S: Send> {
    id: ConnId,
    stream: TcpStream,
    peer: SocketAddr,
    pub(crate) recv: Mutex<BytesMut>,
    pub(crate) send: Mutex<SendQueue>,
    state: Mutex<S>,
    closing: AtomicBool,
    closed: AtomicBool,
    last_activity: Mutex<Instant>,
    max_frame_size: usize,
}

impl<S: Send> Connection<S> {
    pub(crate) fn new(
        id: ConnId,
        stream: TcpStream,
        peer: SocketAddr,
        state: S,
        max_frame_size: usize,
    ) -> Self {
        Connection {
            id,
            stream,
            peer,
            recv: Mutex::new(BytesMut::with_capacity(RECV_BUFFER_CAPACITY)),
            send: Mutex::new(SendQueue::new()),
            state: Mutex::new(state),
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            last_activity: Mutex::new(Instant::now()),
            max_frame_size,
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Locks the application state for reading or mutation.
    pub fn state(&self) -> MutexGuard<'_, S> {
        self.state.lock()
    }

    /// Encodes `packet` now and appends the framed bytes to the send
    /// queue. Sends after [`Connection::close`] are silently discarded;
    /// the queue only drains what was enqueued before closing.
    pub fn send(&self, packet: &dyn OutboundPacket<S>) -> Result<(), PacketError> {
        if self.is_closing() || self.is_closed() {
            debug!(conn = self.id, "dropping send on a closing connection");
            return Ok(());
        }

        let mut writer = PacketWriter::new();
        packet.write(self, &mut writer)?;
        let framed = framing::frame(&writer.into_bytes(), self.max_frame_size)?;

        self.send.lock().blocks.push_back(framed);
        Ok(())
    }

    /// Gracefully closes the channel: optionally enqueues one final
    /// packet, then marks the connection closing. Queued data is still
    /// flushed by the write loop before the socket shuts down; no further
    /// inbound packets are decoded.
    pub fn close(&self, final_packet: Option<&dyn OutboundPacket<S>>) {
        if let Some(packet) = final_packet {
            if let Err(e) = self.send(packet) {
                debug!(conn = self.id, error = %e, "failed to encode final packet");
            }
        }
        self.closing.store(true, Ordering::Release);
    }

    /// Set once the graceful-close sequence begins; never cleared.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Set once the channel is fully torn down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Instant of the last inbound activity on this socket.
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    pub(crate) fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub(crate) fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub(crate) fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Flags the channel closed; returns true for the caller that won the
    /// race and must run the teardown.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn shutdown_socket(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    pub(crate) fn has_pending_output(&self) -> bool {
        !self.send.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PacketWriter;

    struct Probe(&'static [u8]);

    impl OutboundPacket<()> for Probe {
        fn write(&self, _conn: &Connection<()>, buf: &mut PacketWriter) -> Result<(), PacketError> {
            buf.write_bytes(self.0);
            Ok(())
        }
    }

    fn test_connection() -> Connection<()> {
        // A connected pair over loopback; the listener side is dropped.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let std_stream = std::net::TcpStream::connect(addr).unwrap();
        std_stream.set_nonblocking(true).unwrap();
        let stream = TcpStream::from_std(std_stream);
        Connection::new(1, stream, addr, (), 64)
    }

    #[test]
    fn test_send_enqueues_framed_blocks_in_order() {
        let conn = test_connection();
        conn.send(&Probe(b"\x01aa")).unwrap();
        conn.send(&Probe(b"\x02bbb")).unwrap();

        let q = conn.send.lock();
        assert_eq!(q.blocks.len(), 2);
        assert_eq!(&q.blocks[0][..], &[3, 0, 0x01, b'a', b'a']);
        assert_eq!(&q.blocks[1][..], &[4, 0, 0x02, b'b', b'b', b'b']);
    }

    #[test]
    fn test_send_after_close_is_discarded() {
        let conn = test_connection();
        conn.close(Some(&Probe(b"\x7Fbye")));
        assert!(conn.is_closing());
        assert_eq!(conn.send.lock().blocks.len(), 1);

        conn.send(&Probe(b"\x01late")).unwrap();
        assert_eq!(conn.send.lock().blocks.len(), 1);
    }

    #[test]
    fn test_oversized_send_is_a_protocol_violation() {
        let conn = test_connection();
        assert!(matches!(
            conn.send(&Probe(&[0u8; 128])),
            Err(PacketError::ProtocolViolation(_))
        ));
        assert!(conn.send.lock().is_empty());
    }

    #[test]
    fn test_mark_closed_races_to_one_winner() {
        let conn = test_connection();
        assert!(conn.mark_closed());
        assert!(!conn.mark_closed());
        assert!(conn.is_closed());
    }
}
