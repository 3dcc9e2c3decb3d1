//! Shared helpers for end-to-end engine tests
//!
//! Tests drive a real [`MmoController`] running the reference login/echo
//! protocol through plain blocking sockets, the way an actual game client
//! would: 2-byte little-endian length prefix, then the payload.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use mmocore::{MmoConfig, MmoController, PacketWriter};
use mmocore_server::protocol::{LoginProtocol, opcode_table};

pub const IO_TIMEOUT: Duration = Duration::from_secs(2);

/// Starts an engine on an ephemeral loopback port.
pub fn start_server(config: MmoConfig) -> Result<MmoController<LoginProtocol>> {
    MmoController::start(
        "127.0.0.1:0".parse()?,
        config,
        LoginProtocol,
        opcode_table(),
    )
    .context("failed to start engine")
}

/// Connects a blocking client socket with read/write timeouts.
pub fn connect(addr: SocketAddr) -> Result<TcpStream> {
    let stream = TcpStream::connect_timeout(&addr, IO_TIMEOUT)?;
    stream.set_read_timeout(Some(IO_TIMEOUT))?;
    stream.set_write_timeout(Some(IO_TIMEOUT))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Writes one length-prefixed frame.
pub fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> Result<()> {
    let len = u16::try_from(payload.len()).context("payload too large to frame")?;
    stream.write_all(&len.to_le_bytes())?;
    stream.write_all(payload)?;
    Ok(())
}

/// Reads one length-prefixed frame.
pub fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut prefix = [0u8; 2];
    stream.read_exact(&mut prefix)?;
    let len = u16::from_le_bytes(prefix) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;
    Ok(payload)
}

/// Asserts the server closed the connection without sending more frames.
pub fn expect_closed(stream: &mut TcpStream) -> Result<()> {
    let mut byte = [0u8; 1];
    match stream.read(&mut byte) {
        Ok(0) => Ok(()),
        Ok(n) => bail!("expected EOF, got {n} more bytes"),
        // RST from an abrupt shutdown also counts as closed
        Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => Ok(()),
        Err(e) => Err(e).context("expected EOF"),
    }
}

// Payload builders for the reference protocol.

pub fn ping(client_time: u64) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0x00);
    w.write_u64(client_time);
    w.into_bytes().to_vec()
}

pub fn auth(account: &str, password: &str) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0x01);
    w.write_string(account);
    w.write_string(password);
    w.into_bytes().to_vec()
}

pub fn echo(payload: &[u8]) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0x02);
    w.write_u16(payload.len() as u16);
    w.write_bytes(payload);
    w.into_bytes().to_vec()
}

pub fn quit() -> Vec<u8> {
    vec![0x03]
}

pub fn keep_alive() -> Vec<u8> {
    vec![0xFE, 0x01]
}

/// Authenticates and consumes the `AuthResult` frame.
pub fn authenticate(stream: &mut TcpStream, account: &str) -> Result<()> {
    write_frame(stream, &auth(account, "secret"))?;
    let reply = read_frame(stream)?;
    if reply != [0x01, 0x01] {
        bail!("authentication failed: {reply:?}");
    }
    Ok(())
}
