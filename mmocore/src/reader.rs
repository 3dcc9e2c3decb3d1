//! Read loop: socket -> frames -> decoded packets -> dispatcher

use std::io::{self, Read};
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use ahash::AHashMap;
use mio::{Events, Poll};
use tracing::{debug, warn};

use crate::connection::{ConnId, Connection};
use crate::controller::{finalize_close, ClientProtocol, SharedRegistry};
use crate::dispatcher::Dispatcher;
use crate::error::PacketError;
use crate::flood::{FloodManager, FloodResult};
use crate::framing;
use crate::packet::OpcodeTable;
use crate::selector::LoopBody;

const READ_CHUNK: usize = 4096;

/// Read loop body: owns readiness polling for its share of connections.
///
/// Newly accepted connections arrive over the handoff channel after the
/// accept loop registered their streams with this loop's poll registry.
pub(crate) struct ReadLoop<P: ClientProtocol> {
    poll: Poll,
    events: Events,
    incoming: Receiver<Arc<Connection<P::State>>>,
    conns: AHashMap<ConnId, Arc<Connection<P::State>>>,
    /// Connections adopted since the last poll; probed once because an
    /// edge-triggered readable event may have fired before adoption.
    fresh: Vec<ConnId>,
    protocol: Arc<P>,
    table: Arc<OpcodeTable<P::State>>,
    flood: Arc<FloodManager>,
    dispatcher: Arc<Dispatcher>,
    registry: SharedRegistry<P::State>,
}

impl<P: ClientProtocol> ReadLoop<P> {
    pub(crate) fn new(
        poll: Poll,
        incoming: Receiver<Arc<Connection<P::State>>>,
        protocol: Arc<P>,
        table: Arc<OpcodeTable<P::State>>,
        flood: Arc<FloodManager>,
        dispatcher: Arc<Dispatcher>,
        registry: SharedRegistry<P::State>,
    ) -> Self {
        ReadLoop {
            poll,
            events: Events::with_capacity(256),
            incoming,
            conns: AHashMap::new(),
            fresh: Vec::new(),
            protocol,
            table,
            flood,
            dispatcher,
            registry,
        }
    }

    fn close(&self, conn: &Arc<Connection<P::State>>, reason: &str) {
        finalize_close(conn, &self.registry, &*self.protocol, reason);
    }

    fn handle_readable(&mut self, conn: &Arc<Connection<P::State>>) {
        if conn.is_closing() || conn.is_closed() {
            return;
        }

        let mut chunk = [0u8; READ_CHUNK];
        let mut stream = conn.stream();
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => {
                    self.close(conn, "peer closed the connection");
                    return;
                }
                Ok(n) => {
                    conn.recv.lock().extend_from_slice(&chunk[..n]);
                    conn.touch();
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(conn = conn.id(), error = %e, "read failed");
                    self.close(conn, "read error");
                    return;
                }
            }
        }

        // Decode every complete frame accumulated so far. A protocol
        // violation or decode failure abandons the rest of the buffer.
        while !conn.is_closing() && !conn.is_closed() {
            let frame = {
                let mut recv = conn.recv.lock();
                framing::extract_frame(&mut recv, conn.max_frame_size())
            };
            match frame {
                Ok(Some(payload)) => self.process_frame(conn, &payload),
                Ok(None) => break,
                Err(e) => {
                    warn!(conn = conn.id(), peer = %conn.peer(), error = %e, "framing violation");
                    self.close(conn, "framing violation");
                    break;
                }
            }
        }
    }

    fn process_frame(&mut self, conn: &Arc<Connection<P::State>>, payload: &[u8]) {
        let key = self.protocol.flood_key(conn);
        match self.flood.check(key.as_deref().unwrap_or(""), true) {
            FloodResult::Rejected => {
                warn!(conn = conn.id(), peer = %conn.peer(), "flooding, closing connection");
                self.close(conn, "flood rejection");
                return;
            }
            FloodResult::Warned => {
                warn!(conn = conn.id(), peer = %conn.peer(), "approaching flood limit");
            }
            FloodResult::Accepted => {}
        }

        let mut reader = crate::buffer::PacketReader::new(payload);
        let mut packet = match self.table.create(&mut reader) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(conn = conn.id(), error = %e, "undecodable frame");
                self.close(conn, "undecodable frame");
                return;
            }
        };

        if reader.remaining() < packet.minimum_length() {
            let e = PacketError::BufferUnderflow {
                needed: packet.minimum_length(),
                remaining: reader.remaining(),
            };
            warn!(conn = conn.id(), error = %e, "truncated packet");
            self.close(conn, "truncated packet");
            return;
        }

        if let Err(e) = packet.read(&mut reader) {
            warn!(conn = conn.id(), error = %e, "packet decode failed");
            self.close(conn, "packet decode failed");
            return;
        }

        let conn = conn.clone();
        let id = conn.id();
        self.dispatcher.submit(
            id,
            Box::new(move || {
                if let Err(e) = packet.run(&conn) {
                    warn!(conn = id, error = %e, "packet execution failed");
                }
            }),
        );
    }
}

impl<P: ClientProtocol> LoopBody for ReadLoop<P> {
    const NAME: &'static str = "read";

    fn cleanup(&mut self) {
        while let Ok(conn) = self.incoming.try_recv() {
            self.fresh.push(conn.id());
            self.conns.insert(conn.id(), conn);
        }
        self.conns.retain(|_, conn| !conn.is_closed());
    }

    fn poll_once(&mut self) -> io::Result<()> {
        for id in std::mem::take(&mut self.fresh) {
            if let Some(conn) = self.conns.get(&id).cloned() {
                self.handle_readable(&conn);
            }
        }

        match self.poll.poll(&mut self.events, Some(Duration::ZERO)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        let ready: Vec<ConnId> = self.events.iter().map(|ev| ev.token().0).collect();
        for id in ready {
            // Tokens not adopted yet are covered by the fresh probe on a
            // later iteration.
            if let Some(conn) = self.conns.get(&id).cloned() {
                self.handle_readable(&conn);
            }
        }
        Ok(())
    }

    fn close_all(&mut self) {
        for conn in self.conns.values() {
            finalize_close(conn, &self.registry, &*self.protocol, "engine shutdown");
        }
        self.conns.clear();
    }
}
