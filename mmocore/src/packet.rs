//! Inbound/outbound packet capability traits and opcode dispatch
//!
//! The application layer supplies concrete packet types conforming to
//! these two contracts and registers inbound decoders in an
//! [`OpcodeTable`]. The engine never knows the wire layout of any
//! individual packet; it only frames bytes, picks a decoder by opcode and
//! moves execution off the I/O path.

use std::collections::HashMap;
use std::sync::Arc;

use crate::buffer::{PacketReader, PacketWriter};
use crate::connection::Connection;
use crate::error::PacketError;

/// A packet received from a peer.
///
/// `read` runs on the read loop and must be cheap: structured field reads
/// only, no blocking, no shared game state. `run` executes later on a
/// worker thread and may block, perform I/O and mutate shared state.
pub trait InboundPacket<S: Send>: Send {
    /// Smallest legal payload size (in bytes, after the opcode bytes).
    /// Shorter payloads are treated as corrupt and close the connection.
    fn minimum_length(&self) -> usize {
        0
    }

    /// Decodes the payload into the packet's fields.
    fn read(&mut self, buf: &mut PacketReader<'_>) -> Result<(), PacketError>;

    /// Executes the decoded request against the owning connection.
    fn run(&mut self, conn: &Arc<Connection<S>>) -> Result<(), PacketError>;
}

/// A packet to be sent to a peer.
///
/// Encoding happens synchronously when the packet is handed to a
/// connection for sending; the enqueued bytes are immutable afterwards.
pub trait OutboundPacket<S: Send> {
    fn write(&self, conn: &Connection<S>, buf: &mut PacketWriter) -> Result<(), PacketError>;
}

type PacketFactory<S> = Box<dyn Fn() -> Box<dyn InboundPacket<S>> + Send + Sync>;

enum Dispatch<S> {
    Packet(PacketFactory<S>),
    /// Sub-dispatch on one extended opcode byte following the primary one.
    Extended(HashMap<u8, PacketFactory<S>>),
}

/// Maps leading opcode byte(s) of a frame payload to a decoder factory.
pub struct OpcodeTable<S: Send> {
    entries: HashMap<u8, Dispatch<S>>,
}

impl<S: Send> OpcodeTable<S> {
    pub fn new() -> Self {
        OpcodeTable {
            entries: HashMap::new(),
        }
    }

    /// Registers a decoder for a primary opcode.
    pub fn register<P, F>(mut self, opcode: u8, factory: F) -> Self
    where
        P: InboundPacket<S> + 'static,
        F: Fn() -> P + Send + Sync + 'static,
    {
        self.entries.insert(
            opcode,
            Dispatch::Packet(Box::new(move || Box::new(factory()))),
        );
        self
    }

    /// Registers a decoder for a primary + extended opcode pair.
    pub fn register_ext<P, F>(mut self, opcode: u8, extended: u8, factory: F) -> Self
    where
        P: InboundPacket<S> + 'static,
        F: Fn() -> P + Send + Sync + 'static,
    {
        let entry = self
            .entries
            .entry(opcode)
            .or_insert_with(|| Dispatch::Extended(HashMap::new()));
        match entry {
            Dispatch::Extended(table) => {
                table.insert(extended, Box::new(move || Box::new(factory())));
            }
            Dispatch::Packet(_) => {
                panic!("opcode 0x{opcode:02X} already registered as a plain packet");
            }
        }
        self
    }

    /// Consumes the opcode byte(s) from `reader` and instantiates the
    /// matching packet. An unrecognized opcode sequence is a decode
    /// failure, not a crash.
    pub fn create(
        &self,
        reader: &mut PacketReader<'_>,
    ) -> Result<Box<dyn InboundPacket<S>>, PacketError> {
        let opcode = reader.read_u8()?;
        match self.entries.get(&opcode) {
            Some(Dispatch::Packet(factory)) => Ok(factory()),
            Some(Dispatch::Extended(table)) => {
                let extended = reader.read_u8()?;
                match table.get(&extended) {
                    Some(factory) => Ok(factory()),
                    None => Err(PacketError::UnknownOpcode {
                        opcode,
                        extended: Some(extended),
                    }),
                }
            }
            None => Err(PacketError::UnknownOpcode {
                opcode,
                extended: None,
            }),
        }
    }
}

impl<S: Send> Default for OpcodeTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Marker(u8);

    impl InboundPacket<()> for Marker {
        fn read(&mut self, buf: &mut PacketReader<'_>) -> Result<(), PacketError> {
            self.0 = buf.read_u8()?;
            Ok(())
        }

        fn run(&mut self, _conn: &Arc<Connection<()>>) -> Result<(), PacketError> {
            Ok(())
        }
    }

    fn table() -> OpcodeTable<()> {
        OpcodeTable::new()
            .register(0x01, Marker::default)
            .register_ext(0xFE, 0x10, Marker::default)
            .register_ext(0xFE, 0x11, Marker::default)
    }

    #[test]
    fn test_primary_opcode_dispatch() {
        let t = table();
        let mut r = PacketReader::new(&[0x01, 0x42]);
        let mut p = t.create(&mut r).unwrap();
        p.read(&mut r).unwrap();
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_extended_opcode_dispatch() {
        let t = table();
        let mut r = PacketReader::new(&[0xFE, 0x11, 0x07]);
        let mut p = t.create(&mut r).unwrap();
        p.read(&mut r).unwrap();
    }

    #[test]
    fn test_unknown_primary_opcode() {
        let t = table();
        let mut r = PacketReader::new(&[0x99]);
        assert!(matches!(
            t.create(&mut r),
            Err(PacketError::UnknownOpcode {
                opcode: 0x99,
                extended: None
            })
        ));
    }

    #[test]
    fn test_unknown_extended_opcode() {
        let t = table();
        let mut r = PacketReader::new(&[0xFE, 0x99]);
        assert!(matches!(
            t.create(&mut r),
            Err(PacketError::UnknownOpcode {
                opcode: 0xFE,
                extended: Some(0x99)
            })
        ));
    }

    #[test]
    fn test_truncated_extended_opcode_underflows() {
        let t = table();
        let mut r = PacketReader::new(&[0xFE]);
        assert!(matches!(
            t.create(&mut r),
            Err(PacketError::BufferUnderflow { .. })
        ));
    }
}
