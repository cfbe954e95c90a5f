//! Wire-level primitives shared by the parser and serializer.
//!
//! Every frame starts with a 12-byte little-endian header:
//! ```text
//! ┌──────────┬──────────┬──────────┐
//! │ Size     │ Type     │ Id       │
//! │ 4 bytes  │ 4 bytes  │ 4 bytes  │
//! │ u32 LE   │ u32 LE   │ u32 LE   │
//! └──────────┴──────────┴──────────┘
//! ```
//! `size` counts the payload bytes only, never the header itself.
//!
//! Textual payload fields use the CString layout: a `u32` little-endian
//! length counting the encoded UTF-8 bytes plus one trailing NUL, followed
//! by exactly that many bytes. Raw data blobs (poke and advise payloads)
//! use a plain `u32` length prefix with no NUL convention.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{NetDdeError, Result};

/// Header size in bytes (fixed, exactly 12).
pub const HEADER_SIZE: usize = 12;

/// Frame id carried by server-initiated (asynchronous) packets.
pub const ASYNC_PACKET_ID: u32 = 0xFFFF_FFFF;

/// Highest id assigned to synchronous requests before wrapping back to 1.
pub const MAX_PACKET_ID: u32 = 0xFFFF;

pub(crate) fn get_u8_bool(buf: &mut Bytes) -> Result<bool> {
    if buf.remaining() < 1 {
        return Err(NetDdeError::Protocol(
            "truncated payload: missing result byte".to_string(),
        ));
    }
    Ok(buf.get_u8() != 0)
}

pub(crate) fn get_u32(buf: &mut Bytes) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(NetDdeError::Protocol(
            "truncated payload: missing u32 field".to_string(),
        ));
    }
    Ok(buf.get_u32_le())
}

/// Decode a length-prefixed NUL-terminated string.
///
/// Decoding is deliberately lenient the way the reference peers are: a zero
/// length yields the empty string and invalid UTF-8 is replaced rather than
/// rejected. A length that overruns the payload is a hard decode failure.
pub(crate) fn get_cstring(buf: &mut Bytes) -> Result<String> {
    let len = get_u32(buf)? as usize;
    if len == 0 {
        return Ok(String::new());
    }
    if buf.remaining() < len {
        return Err(NetDdeError::Protocol(
            "malformed CString: length overruns payload".to_string(),
        ));
    }
    let raw = buf.split_to(len);
    Ok(String::from_utf8_lossy(&raw[..len - 1]).into_owned())
}

/// Decode a length-prefixed raw byte blob (zero-copy slice of the payload).
pub(crate) fn get_blob(buf: &mut Bytes) -> Result<Bytes> {
    let len = get_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(NetDdeError::Protocol(
            "malformed data blob: length overruns payload".to_string(),
        ));
    }
    Ok(buf.split_to(len))
}

pub(crate) fn put_cstring(buf: &mut BytesMut, value: &str) {
    buf.put_u32_le(value.len() as u32 + 1);
    buf.put_slice(value.as_bytes());
    buf.put_u8(0);
}

/// Encoded size of a CString field: length prefix + bytes + NUL.
pub(crate) fn cstring_len(value: &str) -> usize {
    4 + value.len() + 1
}
