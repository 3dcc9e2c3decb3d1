//! Engine controller: owns the listener, loops, pool and flood manager
//!
//! [`MmoController::start`] binds the listener, spawns the accept loop,
//! the configured number of read and write loops, the worker pool and the
//! flood sweeper, then returns. [`MmoController::shutdown`] reverses it:
//! loops drain and force-close their connections, the pool finishes
//! queued packets, every thread is joined.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use ahash::AHashMap;
use mio::Poll;
use mio::net::TcpListener;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::acceptor::AcceptLoop;
use crate::config::MmoConfig;
use crate::connection::{ConnId, Connection};
use crate::dispatcher::Dispatcher;
use crate::flood::FloodManager;
use crate::packet::OpcodeTable;
use crate::reader::ReadLoop;
use crate::selector::{run_loop, LoopState};
use crate::writer::WriteLoop;

/// Application-side contract of the engine.
///
/// One implementation serves a whole controller; it supplies the initial
/// per-connection state, the flood identity of a sender and a close hook.
pub trait ClientProtocol: Send + Sync + 'static {
    /// Per-connection application state.
    type State: Send + 'static;

    /// Builds the state attached to a freshly accepted connection.
    fn new_state(&self, peer: SocketAddr) -> Self::State;

    /// Identity under which this sender's packet rate is tracked.
    /// `None` (or an empty string) means the sender has no identity and
    /// every frame from it is rejected.
    fn flood_key(&self, conn: &Connection<Self::State>) -> Option<String>;

    /// Called exactly once per connection, after its socket is shut down
    /// and it left the registry.
    fn on_closed(&self, conn: &Arc<Connection<Self::State>>) {
        let _ = conn;
    }
}

/// All live connections, keyed by id. Shared between the accept loop
/// (insert), the I/O loops (remove on close) and the controller (lookup).
pub(crate) type SharedRegistry<S> = Arc<Mutex<AHashMap<ConnId, Arc<Connection<S>>>>>;

/// Runs the close sequence exactly once per connection, whichever loop
/// gets there first.
pub(crate) fn finalize_close<P: ClientProtocol>(
    conn: &Arc<Connection<P::State>>,
    registry: &SharedRegistry<P::State>,
    protocol: &P,
    reason: &str,
) {
    if !conn.mark_closed() {
        return;
    }
    conn.shutdown_socket();
    registry.lock().remove(&conn.id());
    protocol.on_closed(conn);
    debug!(conn = conn.id(), peer = %conn.peer(), reason, "connection closed");
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A running engine instance.
pub struct MmoController<P: ClientProtocol> {
    protocol: Arc<P>,
    registry: SharedRegistry<P::State>,
    flood: Arc<FloodManager>,
    dispatcher: Arc<Dispatcher>,
    shutdown: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    local_addr: SocketAddr,
}

impl<P: ClientProtocol> MmoController<P> {
    /// Binds `addr` and starts all engine threads.
    pub fn start(
        addr: SocketAddr,
        config: MmoConfig,
        protocol: P,
        table: OpcodeTable<P::State>,
    ) -> Result<Self, ControllerError> {
        config.validate().map_err(ControllerError::Config)?;

        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;

        let protocol = Arc::new(protocol);
        let table = Arc::new(table);
        let registry: SharedRegistry<P::State> = Arc::new(Mutex::new(AHashMap::new()));
        let flood = Arc::new(FloodManager::new(
            config.flood_tick_ms,
            config.flood_filters.clone(),
        ));
        let dispatcher = Dispatcher::new(config.workers, config.dispatch_queue_size)?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let interval = Duration::from_millis(config.poll_interval_ms);

        let mut threads = Vec::new();

        // Read loops own their polls; the accept loop registers accepted
        // streams through cloned registry handles.
        let mut read_polls = Vec::with_capacity(config.read_loops);
        let mut read_registries = Vec::with_capacity(config.read_loops);
        for _ in 0..config.read_loops {
            let poll = Poll::new()?;
            read_registries.push(poll.registry().try_clone()?);
            read_polls.push(poll);
        }

        let mut read_tx = Vec::with_capacity(config.read_loops);
        let mut read_rx = Vec::with_capacity(config.read_loops);
        for _ in 0..config.read_loops {
            let (tx, rx) = mpsc::channel();
            read_tx.push(tx);
            read_rx.push(rx);
        }
        let mut write_tx = Vec::with_capacity(config.write_loops);
        let mut write_rx = Vec::with_capacity(config.write_loops);
        for _ in 0..config.write_loops {
            let (tx, rx) = mpsc::channel();
            write_tx.push(tx);
            write_rx.push(rx);
        }

        let accept = AcceptLoop::new(
            listener,
            &config,
            protocol.clone(),
            registry.clone(),
            read_registries,
            read_tx,
            write_tx,
        )?;
        threads.push(spawn_loop("mmocore-accept", accept, interval, &shutdown)?);

        for (i, (poll, rx)) in read_polls.into_iter().zip(read_rx).enumerate() {
            let body = ReadLoop::new(
                poll,
                rx,
                protocol.clone(),
                table.clone(),
                flood.clone(),
                dispatcher.clone(),
                registry.clone(),
            );
            threads.push(spawn_loop(&format!("mmocore-read-{i}"), body, interval, &shutdown)?);
        }

        for (i, rx) in write_rx.into_iter().enumerate() {
            let body = WriteLoop::new(rx, protocol.clone(), registry.clone());
            threads.push(spawn_loop(&format!("mmocore-write-{i}"), body, interval, &shutdown)?);
        }

        threads.push(spawn_sweeper(
            flood.clone(),
            shutdown.clone(),
            Duration::from_millis(config.flood_sweep_interval_ms.max(200)),
        )?);

        info!(%local_addr, read_loops = config.read_loops, write_loops = config.write_loops,
              workers = config.workers, "engine started");

        Ok(MmoController {
            protocol,
            registry,
            flood,
            dispatcher,
            shutdown,
            threads: Mutex::new(threads),
            local_addr,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of currently open connections.
    pub fn connection_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Looks up a live connection by id.
    pub fn connection(&self, id: ConnId) -> Option<Arc<Connection<P::State>>> {
        self.registry.lock().get(&id).cloned()
    }

    /// Keys currently tracked by the flood manager.
    pub fn flood_tracked_keys(&self) -> usize {
        self.flood.tracked_keys()
    }

    /// Stops the engine: loops drain and close their connections, the
    /// worker pool finishes queued packets, all threads are joined.
    /// Idempotent; the second call returns immediately.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        let threads = std::mem::take(&mut *self.threads.lock());
        for handle in threads {
            let _ = handle.join();
        }
        self.dispatcher.shutdown();

        // Loops force-close everything they own; anything accepted but
        // never adopted is torn down here.
        let leftover: Vec<_> = self.registry.lock().values().cloned().collect();
        for conn in leftover {
            finalize_close(&conn, &self.registry, &*self.protocol, "engine shutdown");
        }
        info!("engine stopped");
    }
}

impl<P: ClientProtocol> Drop for MmoController<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_loop<B>(
    name: &str,
    body: B,
    interval: Duration,
    shutdown: &Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>>
where
    B: crate::selector::LoopBody + Send + 'static,
{
    let shutdown = shutdown.clone();
    let state = Arc::new(AtomicU8::new(LoopState::Running as u8));
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || run_loop(body, interval, shutdown, state))
}

fn spawn_sweeper(
    flood: Arc<FloodManager>,
    shutdown: Arc<AtomicBool>,
    interval: Duration,
) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("mmocore-flood-sweep".to_string())
        .spawn(move || {
            let slice = Duration::from_millis(200);
            let mut waited = Duration::ZERO;
            while !shutdown.load(Ordering::Acquire) {
                std::thread::sleep(slice.min(interval));
                waited += slice;
                if waited >= interval {
                    flood.sweep();
                    waited = Duration::ZERO;
                }
            }
        })
}
