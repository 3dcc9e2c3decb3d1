//! Listener loop: accepts sockets and hands them to the read/write loops

use std::io;
use std::sync::Arc;
use std::sync::mpsc::Sender;

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Registry, Token};
use tracing::{debug, warn};

use crate::config::MmoConfig;
use crate::connection::Connection;
use crate::controller::{ClientProtocol, SharedRegistry};
use crate::selector::LoopBody;

const LISTENER: Token = Token(0);

/// Accept loop body: one per controller.
///
/// Accepted streams are registered with a read loop's poll registry
/// (round-robin across loops) under their connection id, then announced
/// to that read loop and to a write loop over handoff channels.
pub(crate) struct AcceptLoop<P: ClientProtocol> {
    listener: TcpListener,
    poll: Poll,
    events: Events,
    protocol: Arc<P>,
    registry: SharedRegistry<P::State>,
    read_registries: Vec<Registry>,
    read_handoff: Vec<Sender<Arc<Connection<P::State>>>>,
    write_handoff: Vec<Sender<Arc<Connection<P::State>>>>,
    max_frame_size: usize,
    next_id: usize,
    next_read: usize,
    next_write: usize,
}

impl<P: ClientProtocol> AcceptLoop<P> {
    pub(crate) fn new(
        mut listener: TcpListener,
        config: &MmoConfig,
        protocol: Arc<P>,
        registry: SharedRegistry<P::State>,
        read_registries: Vec<Registry>,
        read_handoff: Vec<Sender<Arc<Connection<P::State>>>>,
        write_handoff: Vec<Sender<Arc<Connection<P::State>>>>,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        Ok(AcceptLoop {
            listener,
            poll,
            events: Events::with_capacity(16),
            protocol,
            registry,
            read_registries,
            read_handoff,
            write_handoff,
            max_frame_size: config.max_frame_size,
            // Token(0) belongs to listeners across all polls.
            next_id: 1,
            next_read: 0,
            next_write: 0,
        })
    }

    fn accept_ready(&mut self) {
        loop {
            let (mut stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    return;
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!(%peer, error = %e, "set_nodelay failed");
            }

            let id = self.next_id;
            self.next_id += 1;
            let read_idx = self.next_read;
            self.next_read = (self.next_read + 1) % self.read_registries.len();
            let write_idx = self.next_write;
            self.next_write = (self.next_write + 1) % self.write_handoff.len();

            if let Err(e) =
                self.read_registries[read_idx].register(&mut stream, Token(id), Interest::READABLE)
            {
                warn!(%peer, error = %e, "failed to register accepted socket");
                continue;
            }

            let state = self.protocol.new_state(peer);
            let conn = Arc::new(Connection::new(id, stream, peer, state, self.max_frame_size));
            self.registry.lock().insert(id, conn.clone());

            // A closed handoff channel means the target loop is gone;
            // the controller is shutting down and the socket just drops.
            if self.read_handoff[read_idx].send(conn.clone()).is_err()
                || self.write_handoff[write_idx].send(conn.clone()).is_err()
            {
                self.registry.lock().remove(&id);
                return;
            }

            debug!(conn = id, %peer, "accepted connection");
        }
    }
}

impl<P: ClientProtocol> LoopBody for AcceptLoop<P> {
    const NAME: &'static str = "accept";

    fn cleanup(&mut self) {}

    fn poll_once(&mut self) -> io::Result<()> {
        match self.poll.poll(&mut self.events, Some(std::time::Duration::ZERO)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }
        if !self.events.is_empty() {
            self.accept_ready();
        }
        Ok(())
    }

    fn close_all(&mut self) {}
}
