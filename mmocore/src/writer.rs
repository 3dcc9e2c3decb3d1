//! Write loop: drains send queues and finalizes graceful closes
//!
//! The write side keeps no poll of its own: its ready set is the
//! connections with queued bytes, probed with non-blocking writes each
//! iteration. A socket whose kernel buffer is full returns `WouldBlock`
//! and is retried on the next iteration.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::mpsc::Receiver;

use ahash::AHashMap;
use tracing::debug;

use crate::connection::{ConnId, Connection};
use crate::controller::{finalize_close, ClientProtocol, SharedRegistry};
use crate::selector::LoopBody;

pub(crate) struct WriteLoop<P: ClientProtocol> {
    incoming: Receiver<Arc<Connection<P::State>>>,
    conns: AHashMap<ConnId, Arc<Connection<P::State>>>,
    protocol: Arc<P>,
    registry: SharedRegistry<P::State>,
}

impl<P: ClientProtocol> WriteLoop<P> {
    pub(crate) fn new(
        incoming: Receiver<Arc<Connection<P::State>>>,
        protocol: Arc<P>,
        registry: SharedRegistry<P::State>,
    ) -> Self {
        WriteLoop {
            incoming,
            conns: AHashMap::new(),
            protocol,
            registry,
        }
    }

    /// Writes as much queued data as the socket accepts right now.
    /// Returns false when the connection died mid-write.
    fn drain(&self, conn: &Arc<Connection<P::State>>) -> bool {
        let mut queue = conn.send.lock();
        let mut stream = conn.stream();

        loop {
            let q = &mut *queue;
            let Some(block) = q.blocks.front() else { break };
            let block_len = block.len();
            match stream.write(&block[q.offset..]) {
                Ok(0) => {
                    drop(queue);
                    finalize_close(conn, &self.registry, &*self.protocol, "write returned 0");
                    return false;
                }
                Ok(n) => {
                    q.offset += n;
                    if q.offset == block_len {
                        q.blocks.pop_front();
                        q.offset = 0;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    drop(queue);
                    debug!(conn = conn.id(), error = %e, "write failed");
                    finalize_close(conn, &self.registry, &*self.protocol, "write error");
                    return false;
                }
            }
        }
        true
    }
}

impl<P: ClientProtocol> LoopBody for WriteLoop<P> {
    const NAME: &'static str = "write";

    fn cleanup(&mut self) {
        while let Ok(conn) = self.incoming.try_recv() {
            self.conns.insert(conn.id(), conn);
        }
        self.conns.retain(|_, conn| !conn.is_closed());
    }

    fn poll_once(&mut self) -> io::Result<()> {
        for conn in self.conns.values() {
            if conn.is_closed() {
                continue;
            }
            if conn.has_pending_output() && !self.drain(conn) {
                continue;
            }
            // Graceful close completes once everything queued before the
            // close call has reached the socket.
            if conn.is_closing() && !conn.has_pending_output() {
                finalize_close(conn, &self.registry, &*self.protocol, "graceful close");
            }
        }
        Ok(())
    }

    fn close_all(&mut self) {
        // Last flush attempt, then unconditional teardown.
        for conn in self.conns.values() {
            if !conn.is_closed() && conn.has_pending_output() {
                self.drain(conn);
            }
            finalize_close(conn, &self.registry, &*self.protocol, "engine shutdown");
        }
        self.conns.clear();
    }
}
