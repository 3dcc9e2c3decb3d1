//! Reference login/echo server built on the mmocore engine.
//!
//! The wire protocol is deliberately small but exercises every engine
//! surface: plain and extended opcodes, authentication state carried in
//! the per-connection session, graceful close with a final packet and
//! flood keying that switches from source address to account name once a
//! client authenticates.
//!
//! # Protocol
//!
//! | opcode      | direction | packet        |
//! |-------------|-----------|---------------|
//! | `0x00`      | C -> S    | Ping          |
//! | `0x00`      | S -> C    | Pong          |
//! | `0x01`      | C -> S    | AuthRequest   |
//! | `0x01`      | S -> C    | AuthResult    |
//! | `0x02`      | C -> S    | EchoRequest   |
//! | `0x02`      | S -> C    | EchoReply     |
//! | `0x03`      | C -> S    | Quit          |
//! | `0x03`      | S -> C    | Goodbye       |
//! | `0xFE 0x01` | C -> S    | KeepAlive     |

pub mod config;
pub mod packets;
pub mod protocol;
