//! Inbound frame parsing with partial-buffer reassembly.
//!
//! The transport delivers bytes at arbitrary split points; [`Parser`] keeps
//! the not-yet-complete tail in a carry-over buffer and emits every frame
//! that completes, in arrival order. No partial-header state survives a
//! chunk boundary: until `12 + size` bytes are available the raw bytes stay
//! buffered and the header is re-read on the next push.

use bytes::{Buf, Bytes, BytesMut};

use super::packet::{Notice, Packet, PacketBody, Response};
use super::packet_type;
use super::wire::{get_blob, get_cstring, get_u32, get_u8_bool, HEADER_SIZE};
use crate::error::{NetDdeError, Result};

/// Buffer for accumulating inbound bytes and extracting complete packets.
pub struct Parser {
    buffer: BytesMut,
}

impl Parser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
        }
    }

    /// Push a chunk of bytes and extract every packet that completes.
    ///
    /// Returns an empty vector while a frame is still incomplete. An
    /// unknown packet type or a malformed payload is a hard decode failure
    /// for the chunk; no packet is emitted for the offending frame.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Packet>> {
        self.buffer.extend_from_slice(chunk);

        let mut packets = Vec::new();
        loop {
            if self.buffer.len() < HEADER_SIZE {
                break;
            }

            let size = u32::from_le_bytes([
                self.buffer[0],
                self.buffer[1],
                self.buffer[2],
                self.buffer[3],
            ]) as usize;
            if self.buffer.len() < HEADER_SIZE + size {
                break;
            }

            let mut header = self.buffer.split_to(HEADER_SIZE);
            header.advance(4);
            let packet_type = header.get_u32_le();
            let id = header.get_u32_le();

            let mut payload = self.buffer.split_to(size).freeze();
            let body = decode_body(packet_type, &mut payload)?;
            packets.push(Packet { id, body });
        }

        Ok(packets)
    }

    /// Number of buffered carry-over bytes.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_body(packet_type: u32, payload: &mut Bytes) -> Result<PacketBody> {
    let body = match packet_type {
        packet_type::NETDDE_CLIENT_CONNECT => {
            let result = get_u8_bool(payload)?;
            let version = get_cstring(payload)?;
            PacketBody::Response(Response::Connect { result, version })
        }

        packet_type::DDE_CREATE_CONVERSATION => {
            let result = get_u8_bool(payload)?;
            let handle = get_u32(payload)?;
            let conv_id = get_u32(payload)?;
            PacketBody::Response(Response::CreateConversation {
                result,
                handle,
                conv_id,
            })
        }

        packet_type::DDE_REQUEST => {
            let result = get_u8_bool(payload)?;
            let data = get_blob(payload)?;
            PacketBody::Response(Response::Request { result, data })
        }

        packet_type::DDE_POKE => PacketBody::Response(Response::Poke {
            result: get_u8_bool(payload)?,
        }),

        packet_type::DDE_EXECUTE => PacketBody::Response(Response::Execute {
            result: get_u8_bool(payload)?,
        }),

        packet_type::DDE_START_ADVISE => PacketBody::Response(Response::StartAdvise {
            result: get_u8_bool(payload)?,
        }),

        packet_type::NETDDE_SERVER_DISCONNECT => PacketBody::Notice(Notice::ServerDisconnect),

        packet_type::DDE_DISCONNECT => PacketBody::Notice(Notice::ConversationDisconnect {
            handle: get_u32(payload)?,
        }),

        packet_type::DDE_ADVISE => {
            let handle = get_u32(payload)?;
            let item = get_cstring(payload)?;
            let format = get_u32(payload)?;
            let data = get_blob(payload)?;
            // trailing fixed flag byte, ignored
            PacketBody::Notice(Notice::Advise {
                handle,
                item,
                format,
                data,
            })
        }

        packet_type::DDE_START_ADVISE_FAILED => {
            let handle = get_u32(payload)?;
            let item = get_cstring(payload)?;
            let format = get_u32(payload)?;
            // trailing fixed flag byte, ignored
            PacketBody::Notice(Notice::AdviseStartFailed {
                handle,
                item,
                format,
            })
        }

        unknown => {
            return Err(NetDdeError::Protocol(format!(
                "unknown packet type [{unknown:#06x}] received"
            )))
        }
    };

    Ok(body)
}
