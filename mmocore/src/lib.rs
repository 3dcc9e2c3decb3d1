//! Threaded TCP engine for binary length-prefixed game protocols.
//!
//! The engine owns the socket plumbing of an MMO-style server: accepting
//! connections, splitting the byte stream into frames, decoding frames
//! into typed packets, rate-limiting senders and executing packets on a
//! worker pool while preserving per-connection order. The application
//! supplies the packet types, an opcode table and a [`ClientProtocol`]
//! implementation; everything else is configuration.
//!
//! # Architecture
//!
//! - one accept loop hands sockets to the read/write loops
//! - read loops frame and decode inbound bytes, consult the
//!   [`FloodManager`] and submit execution jobs to the [worker
//!   pool](Dispatcher)
//! - write loops drain per-connection send queues and complete graceful
//!   closes once the queue is empty
//! - the [`MmoController`] owns all of it and tears it down in order
//!
//! Packets of one connection always execute in arrival order; packets of
//! different connections interleave freely across workers.
//!
//! # Example
//!
//! ```no_run
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//!
//! use mmocore::{
//!     ClientProtocol, Connection, InboundPacket, MmoConfig, MmoController, OpcodeTable,
//!     PacketError, PacketReader,
//! };
//!
//! #[derive(Default)]
//! struct Ping;
//!
//! impl InboundPacket<()> for Ping {
//!     fn read(&mut self, _buf: &mut PacketReader<'_>) -> Result<(), PacketError> {
//!         Ok(())
//!     }
//!
//!     fn run(&mut self, _conn: &Arc<Connection<()>>) -> Result<(), PacketError> {
//!         Ok(())
//!     }
//! }
//!
//! struct Protocol;
//!
//! impl ClientProtocol for Protocol {
//!     type State = ();
//!
//!     fn new_state(&self, _peer: SocketAddr) {}
//!
//!     fn flood_key(&self, conn: &Connection<()>) -> Option<String> {
//!         Some(conn.peer().ip().to_string())
//!     }
//! }
//!
//! fn main() -> Result<(), mmocore::ControllerError> {
//!     let table = OpcodeTable::new().register(0x00, Ping::default);
//!     let engine = MmoController::start(
//!         "0.0.0.0:7777".parse().unwrap(),
//!         MmoConfig::default(),
//!         Protocol,
//!         table,
//!     )?;
//!     // ... serve until told otherwise ...
//!     engine.shutdown();
//!     Ok(())
//! }
//! ```

mod acceptor;
mod buffer;
mod config;
mod connection;
mod controller;
mod dispatcher;
mod error;
mod flood;
pub mod framing;
mod packet;
mod reader;
mod selector;
mod writer;

pub use buffer::{PacketReader, PacketWriter};
pub use config::MmoConfig;
pub use connection::{ConnId, Connection};
pub use controller::{ClientProtocol, ControllerError, MmoController};
pub use dispatcher::Dispatcher;
pub use error::PacketError;
pub use flood::{FloodFilter, FloodManager, FloodResult};
pub use packet::{InboundPacket, OpcodeTable, OutboundPacket};
pub use selector::LoopState;
