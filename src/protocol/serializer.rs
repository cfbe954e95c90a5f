//! Outbound frame serialization.
//!
//! [`serialize`] is a pure function from an id and a typed [`Request`] to a
//! complete wire frame. The byte layouts must be reproduced exactly for
//! interoperability with existing NetDDE peers; the fixtures in the tests
//! below are reference captures.

use bytes::{BufMut, Bytes, BytesMut};

use super::packet::Request;
use super::wire::{cstring_len, put_cstring, ASYNC_PACKET_ID, HEADER_SIZE, MAX_PACKET_ID};
use super::PROTOCOL_VERSION;
use crate::error::{NetDdeError, Result};

/// Serialize a request into a complete frame (header + payload).
///
/// Ids are a synchronous-request resource: zero and the async sentinel are
/// reserved and rejected here rather than silently emitted.
pub fn serialize(id: u32, request: &Request) -> Result<Bytes> {
    if id == 0 || id == ASYNC_PACKET_ID || id > MAX_PACKET_ID {
        return Err(NetDdeError::InvalidPacketId(id));
    }

    let payload = encode_payload(request);

    let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    frame.put_u32_le(payload.len() as u32);
    frame.put_u32_le(request.packet_type());
    frame.put_u32_le(id);
    frame.extend_from_slice(&payload);
    Ok(frame.freeze())
}

fn encode_payload(request: &Request) -> BytesMut {
    match request {
        Request::Connect {
            service,
            computer,
            user,
            process,
            version,
        } => {
            let mut buf = BytesMut::with_capacity(
                2 + cstring_len(service)
                    + cstring_len(computer)
                    + cstring_len(user)
                    + cstring_len(process)
                    + cstring_len(version),
            );
            buf.put_u16_le(PROTOCOL_VERSION);
            put_cstring(&mut buf, service);
            put_cstring(&mut buf, computer);
            put_cstring(&mut buf, user);
            put_cstring(&mut buf, process);
            put_cstring(&mut buf, version);
            buf
        }

        Request::ClientDisconnect { service, computer } => {
            let mut buf = BytesMut::with_capacity(cstring_len(service) + cstring_len(computer));
            put_cstring(&mut buf, service);
            put_cstring(&mut buf, computer);
            buf
        }

        Request::CreateConversation { service, topic } => {
            let mut buf = BytesMut::with_capacity(cstring_len(service) + cstring_len(topic));
            put_cstring(&mut buf, service);
            put_cstring(&mut buf, topic);
            buf
        }

        Request::DestroyConversation { handle, conv_id } => {
            let mut buf = BytesMut::with_capacity(8);
            buf.put_u32_le(*handle);
            buf.put_u32_le(*conv_id);
            buf
        }

        Request::Request {
            handle,
            conv_id,
            item,
            format,
        }
        | Request::StopAdvise {
            handle,
            conv_id,
            item,
            format,
        } => {
            let mut buf = BytesMut::with_capacity(8 + cstring_len(item) + 4);
            buf.put_u32_le(*handle);
            buf.put_u32_le(*conv_id);
            put_cstring(&mut buf, item);
            buf.put_u32_le(*format);
            buf
        }

        Request::Poke {
            handle,
            conv_id,
            item,
            format,
            data,
        } => {
            let mut buf = BytesMut::with_capacity(8 + cstring_len(item) + 8 + data.len());
            buf.put_u32_le(*handle);
            buf.put_u32_le(*conv_id);
            put_cstring(&mut buf, item);
            buf.put_u32_le(*format);
            buf.put_u32_le(data.len() as u32);
            buf.extend_from_slice(data);
            buf
        }

        Request::Execute {
            handle,
            conv_id,
            command,
        } => {
            let mut buf = BytesMut::with_capacity(8 + cstring_len(command));
            buf.put_u32_le(*handle);
            buf.put_u32_le(*conv_id);
            put_cstring(&mut buf, command);
            buf
        }

        Request::StartAdvise {
            handle,
            conv_id,
            item,
            format,
            asynchronous,
            request_value,
        } => {
            let mut buf = BytesMut::with_capacity(8 + cstring_len(item) + 6);
            buf.put_u32_le(*handle);
            buf.put_u32_le(*conv_id);
            put_cstring(&mut buf, item);
            buf.put_u32_le(*format);
            buf.put_u8(u8::from(*asynchronous));
            buf.put_u8(u8::from(*request_value));
            buf
        }
    }
}
