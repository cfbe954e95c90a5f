//! Protocol module - packet types, wire primitives, parsing and serialization.
//!
//! Implements the NetDDE binary protocol as seen from the client side:
//! - 12-byte little-endian frame header
//! - [`Parser`] reassembling frames from an arbitrarily-chunked byte stream
//! - [`serialize`] producing wire frames from typed [`Request`] values

pub mod packet;
pub mod parser;
pub mod serializer;
pub mod wire;

pub use packet::{Notice, Packet, PacketBody, Request, Response};
pub use parser::Parser;
pub use serializer::serialize;
pub use wire::{ASYNC_PACKET_ID, HEADER_SIZE, MAX_PACKET_ID};

/// NetDDE protocol revision carried in the connect handshake.
pub const PROTOCOL_VERSION: u16 = 2;

/// Client version string reported to the server during the handshake.
pub const CLIENT_VERSION: &str = "v2.0";

/// Wire values for every packet kind.
///
/// Synchronous kinds live in the low 12 bits; server-initiated kinds are
/// flagged by the `0xF` high nibble and always travel with the
/// [`ASYNC_PACKET_ID`] frame id.
pub mod packet_type {
    /// High-nibble flag marking server-initiated packet kinds.
    pub const ASYNC_FLAG: u32 = 0xF000;

    // Client -> server session packets.
    pub const NETDDE_CLIENT_CONNECT: u32 = 0x0010;
    pub const NETDDE_CLIENT_DISCONNECT: u32 = 0x0011;

    // Client -> server DDE request packets.
    pub const DDE_CREATE_CONVERSATION: u32 = 0x0020;
    pub const DDE_DESTROY_CONVERSATION: u32 = 0x0021;
    pub const DDE_REQUEST: u32 = 0x0022;
    pub const DDE_START_ADVISE: u32 = 0x0023;
    pub const DDE_STOP_ADVISE: u32 = 0x0024;
    pub const DDE_EXECUTE: u32 = 0x0025;
    pub const DDE_POKE: u32 = 0x0026;

    // Server -> client notification packets.
    pub const NETDDE_SERVER_DISCONNECT: u32 = ASYNC_FLAG | 0x0030;
    pub const DDE_DISCONNECT: u32 = ASYNC_FLAG | 0x0031;
    pub const DDE_ADVISE: u32 = ASYNC_FLAG | 0x0032;
    pub const DDE_START_ADVISE_FAILED: u32 = ASYNC_FLAG | 0x0033;
}
