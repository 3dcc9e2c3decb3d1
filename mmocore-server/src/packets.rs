//! Wire packets of the login/echo protocol
//!
//! Inbound packets split decoding (`read`, on the read loop) from
//! execution (`run`, on a worker). Outbound packets write their opcode
//! byte themselves; framing is the engine's business.

use std::sync::Arc;

use mmocore::{
    Connection, InboundPacket, OutboundPacket, PacketError, PacketReader, PacketWriter,
};
use tracing::debug;

use crate::protocol::{Session, Stage};

// ---------------------------------------------------------------------
// inbound

/// `0x00` - liveness probe carrying the client's clock sample.
#[derive(Default)]
pub struct Ping {
    client_time: u64,
}

impl InboundPacket<Session> for Ping {
    fn minimum_length(&self) -> usize {
        8
    }

    fn read(&mut self, buf: &mut PacketReader<'_>) -> Result<(), PacketError> {
        self.client_time = buf.read_u64()?;
        Ok(())
    }

    fn run(&mut self, conn: &Arc<Connection<Session>>) -> Result<(), PacketError> {
        conn.send(&Pong {
            client_time: self.client_time,
        })
    }
}

/// `0x01` - authentication attempt with account name and password.
#[derive(Default)]
pub struct AuthRequest {
    account: String,
    password: String,
}

impl InboundPacket<Session> for AuthRequest {
    fn minimum_length(&self) -> usize {
        // two empty null-terminated UTF-16 strings
        4
    }

    fn read(&mut self, buf: &mut PacketReader<'_>) -> Result<(), PacketError> {
        self.account = buf.read_string()?;
        self.password = buf.read_string()?;
        Ok(())
    }

    fn run(&mut self, conn: &Arc<Connection<Session>>) -> Result<(), PacketError> {
        if self.account.is_empty() || self.password.is_empty() {
            debug!(peer = %conn.peer(), "rejected empty credentials");
            // failed auth ends the session; the verdict still goes out
            conn.close(Some(&AuthResult { ok: false }));
            return Ok(());
        }

        {
            let mut session = conn.state();
            session.stage = Stage::Authed;
            session.account = Some(std::mem::take(&mut self.account));
        }
        conn.send(&AuthResult { ok: true })
    }
}

/// `0x02` - echo request; only valid after authentication.
#[derive(Default)]
pub struct EchoRequest {
    payload: Vec<u8>,
}

impl InboundPacket<Session> for EchoRequest {
    fn minimum_length(&self) -> usize {
        2
    }

    fn read(&mut self, buf: &mut PacketReader<'_>) -> Result<(), PacketError> {
        let len = buf.read_u16()? as usize;
        self.payload = buf.read_bytes(len)?.to_vec();
        Ok(())
    }

    fn run(&mut self, conn: &Arc<Connection<Session>>) -> Result<(), PacketError> {
        if conn.state().stage != Stage::Authed {
            conn.close(None);
            return Err(PacketError::Execution(
                "echo before authentication".to_string(),
            ));
        }
        conn.send(&EchoReply {
            payload: std::mem::take(&mut self.payload),
        })
    }
}

/// `0x03` - client-initiated goodbye.
#[derive(Default)]
pub struct Quit;

impl InboundPacket<Session> for Quit {
    fn read(&mut self, _buf: &mut PacketReader<'_>) -> Result<(), PacketError> {
        Ok(())
    }

    fn run(&mut self, conn: &Arc<Connection<Session>>) -> Result<(), PacketError> {
        conn.close(Some(&Goodbye));
        Ok(())
    }
}

/// `0xFE 0x01` - extended-opcode keep-alive, no payload, no reply.
#[derive(Default)]
pub struct KeepAlive;

impl InboundPacket<Session> for KeepAlive {
    fn read(&mut self, _buf: &mut PacketReader<'_>) -> Result<(), PacketError> {
        Ok(())
    }

    fn run(&mut self, _conn: &Arc<Connection<Session>>) -> Result<(), PacketError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------
// outbound

/// `0x00` - answer to [`Ping`], echoing the client's clock sample.
pub struct Pong {
    pub client_time: u64,
}

impl OutboundPacket<Session> for Pong {
    fn write(&self, _conn: &Connection<Session>, buf: &mut PacketWriter) -> Result<(), PacketError> {
        buf.write_u8(0x00);
        buf.write_u64(self.client_time);
        Ok(())
    }
}

/// `0x01` - authentication verdict.
pub struct AuthResult {
    pub ok: bool,
}

impl OutboundPacket<Session> for AuthResult {
    fn write(&self, _conn: &Connection<Session>, buf: &mut PacketWriter) -> Result<(), PacketError> {
        buf.write_u8(0x01);
        buf.write_u8(self.ok as u8);
        Ok(())
    }
}

/// `0x02` - echoed payload.
pub struct EchoReply {
    pub payload: Vec<u8>,
}

impl OutboundPacket<Session> for EchoReply {
    fn write(&self, _conn: &Connection<Session>, buf: &mut PacketWriter) -> Result<(), PacketError> {
        buf.write_u8(0x02);
        buf.write_u16(self.payload.len() as u16);
        buf.write_bytes(&self.payload);
        Ok(())
    }
}

/// `0x03` - final packet of a graceful close.
pub struct Goodbye;

impl OutboundPacket<Session> for Goodbye {
    fn write(&self, _conn: &Connection<Session>, buf: &mut PacketWriter) -> Result<(), PacketError> {
        buf.write_u8(0x03);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_request_decodes_both_strings() {
        let mut w = PacketWriter::new();
        w.write_string("azure");
        w.write_string("hunter2");
        let bytes = w.into_bytes();

        let mut p = AuthRequest::default();
        let mut r = PacketReader::new(&bytes);
        p.read(&mut r).unwrap();
        assert_eq!(p.account, "azure");
        assert_eq!(p.password, "hunter2");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_echo_request_rejects_short_payload() {
        // declared length 8, only 3 bytes present
        let mut w = PacketWriter::new();
        w.write_u16(8);
        w.write_bytes(&[1, 2, 3]);
        let bytes = w.into_bytes();

        let mut p = EchoRequest::default();
        let mut r = PacketReader::new(&bytes);
        assert!(matches!(
            p.read(&mut r),
            Err(PacketError::BufferUnderflow { .. })
        ));
    }

    #[test]
    fn test_ping_minimum_length_matches_wire_size() {
        let mut w = PacketWriter::new();
        w.write_u64(123_456);
        let bytes = w.into_bytes();
        assert_eq!(Ping::default().minimum_length(), bytes.len());

        let mut p = Ping::default();
        let mut r = PacketReader::new(&bytes);
        p.read(&mut r).unwrap();
        assert_eq!(p.client_time, 123_456);
    }
}
