//! Session state and the engine-facing protocol implementation

use std::net::SocketAddr;
use std::sync::Arc;

use mmocore::{ClientProtocol, Connection, OpcodeTable};
use tracing::info;

use crate::packets::{AuthRequest, EchoRequest, KeepAlive, Ping, Quit};

/// Authentication progress of one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Connected, not yet authenticated.
    Handshake,
    /// Authenticated; echo traffic is admitted.
    Authed,
}

/// Per-connection application state.
pub struct Session {
    pub peer: SocketAddr,
    pub stage: Stage,
    pub account: Option<String>,
}

/// The login/echo protocol.
#[derive(Default)]
pub struct LoginProtocol;

impl ClientProtocol for LoginProtocol {
    type State = Session;

    fn new_state(&self, peer: SocketAddr) -> Session {
        Session {
            peer,
            stage: Stage::Handshake,
            account: None,
        }
    }

    /// Anonymous clients are throttled per source address; authenticated
    /// ones per account, so one noisy account cannot burn its whole NAT.
    fn flood_key(&self, conn: &Connection<Session>) -> Option<String> {
        let session = conn.state();
        Some(
            session
                .account
                .clone()
                .unwrap_or_else(|| session.peer.ip().to_string()),
        )
    }

    fn on_closed(&self, conn: &Arc<Connection<Session>>) {
        let session = conn.state();
        info!(
            peer = %session.peer,
            account = session.account.as_deref().unwrap_or("-"),
            "session ended"
        );
    }
}

/// Builds the inbound opcode table of the protocol.
pub fn opcode_table() -> OpcodeTable<Session> {
    OpcodeTable::new()
        .register(0x00, Ping::default)
        .register(0x01, AuthRequest::default)
        .register(0x02, EchoRequest::default)
        .register(0x03, Quit::default)
        .register_ext(0xFE, 0x01, KeepAlive::default)
}
