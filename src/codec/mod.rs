//! Format codec - clipboard-format identifiers and item value conversion.
//!
//! Item payloads travel as raw bytes tagged with a numeric clipboard
//! format. The codec converts between [`DdeData`] and those bytes: text
//! formats get NUL-terminated on encode and stripped on decode, everything
//! else passes through untouched as raw bytes.

use bytes::Bytes;

use crate::error::{NetDdeError, Result};

/// Clipboard format identifiers understood on the wire.
pub mod format {
    pub const CF_TEXT: u32 = 1;
    pub const CF_BITMAP: u32 = 2;
    pub const CF_METAFILEPICT: u32 = 3;
    pub const CF_SYLK: u32 = 4;
    pub const CF_DIF: u32 = 5;
    pub const CF_TIFF: u32 = 6;
    pub const CF_OEMTEXT: u32 = 7;
    pub const CF_DIB: u32 = 8;
    pub const CF_PALETTE: u32 = 9;
    pub const CF_PENDATA: u32 = 10;
    pub const CF_RIFF: u32 = 11;
    pub const CF_WAVE: u32 = 12;
    pub const CF_UNICODETEXT: u32 = 13;
    pub const CF_ENHMETAFILE: u32 = 14;
    pub const CF_HDROP: u32 = 15;
    pub const CF_LOCALE: u32 = 16;
    pub const CF_DIBV5: u32 = 17;
    pub const CF_OWNERDISPLAY: u32 = 0x0080;
    pub const CF_DSPTEXT: u32 = 0x0081;
    pub const CF_DSPBITMAP: u32 = 0x0082;
    pub const CF_DSPMETAFILEPICT: u32 = 0x0083;
    pub const CF_DSPENHMETAFILE: u32 = 0x008E;
    pub const CF_PRIVATEFIRST: u32 = 0x0200;
    pub const CF_PRIVATELAST: u32 = 0x02FF;
    pub const CF_GDIOBJFIRST: u32 = 0x0300;
    pub const CF_GDIOBJLAST: u32 = 0x03FF;
}

/// An item value on its way through the format codec.
///
/// `Binary` passes through untouched regardless of the declared format, so
/// callers holding pre-encoded bytes can poke any format the server speaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DdeData {
    Text(String),
    Binary(Bytes),
}

impl DdeData {
    /// Borrow the textual value, if this is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            DdeData::Text(text) => Some(text),
            DdeData::Binary(_) => None,
        }
    }
}

impl From<&str> for DdeData {
    fn from(value: &str) -> Self {
        DdeData::Text(value.to_owned())
    }
}

impl From<String> for DdeData {
    fn from(value: String) -> Self {
        DdeData::Text(value)
    }
}

impl From<Bytes> for DdeData {
    fn from(value: Bytes) -> Self {
        DdeData::Binary(value)
    }
}

impl From<Vec<u8>> for DdeData {
    fn from(value: Vec<u8>) -> Self {
        DdeData::Binary(Bytes::from(value))
    }
}

/// Encode a value into the wire representation for `format`.
///
/// Raw bytes pass through for every format. Text only encodes for the
/// plain-text format; other formats require the caller to supply bytes.
pub fn encode(format_id: u32, data: &DdeData) -> Result<Bytes> {
    match data {
        DdeData::Binary(bytes) => Ok(bytes.clone()),
        DdeData::Text(text) => match format_id {
            format::CF_TEXT => {
                let mut encoded = Vec::with_capacity(text.len() + 1);
                encoded.extend_from_slice(text.as_bytes());
                encoded.push(0);
                Ok(Bytes::from(encoded))
            }
            other => Err(NetDdeError::UnsupportedFormat(other)),
        },
    }
}

/// Decode wire bytes according to `format`.
///
/// Text formats lose their trailing NUL and come back as text; every
/// unknown format passes through as raw bytes.
pub fn decode(format_id: u32, data: Bytes) -> DdeData {
    match format_id {
        format::CF_TEXT | format::CF_UNICODETEXT => {
            let text = String::from_utf8_lossy(&data);
            let text = text.strip_suffix('\0').unwrap_or(&text);
            DdeData::Text(text.to_owned())
        }
        _ => DdeData::Binary(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_encode_appends_nul() {
        let encoded = encode(format::CF_TEXT, &DdeData::from("foo")).unwrap();
        assert_eq!(&encoded[..], b"foo\0");
    }

    #[test]
    fn text_decode_strips_single_trailing_nul() {
        let decoded = decode(format::CF_TEXT, Bytes::from_static(b"bar\r\n\0"));
        assert_eq!(decoded, DdeData::Text("bar\r\n".into()));

        // only the final NUL is stripped
        let decoded = decode(format::CF_TEXT, Bytes::from_static(b"a\0\0"));
        assert_eq!(decoded, DdeData::Text("a\0".into()));
    }

    #[test]
    fn unicode_text_decodes_as_text() {
        let decoded = decode(format::CF_UNICODETEXT, Bytes::from_static("héllo\0".as_bytes()));
        assert_eq!(decoded, DdeData::Text("héllo".into()));
    }

    #[test]
    fn binary_passes_through_any_format() {
        let raw = Bytes::from_static(&[0xDE, 0xAD, 0xBE, 0xEF]);
        let encoded = encode(format::CF_DIB, &DdeData::Binary(raw.clone())).unwrap();
        assert_eq!(encoded, raw);

        let decoded = decode(format::CF_DIB, raw.clone());
        assert_eq!(decoded, DdeData::Binary(raw));
    }

    #[test]
    fn text_for_unsupported_format_is_an_error() {
        let err = encode(format::CF_BITMAP, &DdeData::from("nope")).unwrap_err();
        assert!(matches!(err, NetDdeError::UnsupportedFormat(f) if f == format::CF_BITMAP));
    }

    #[test]
    fn text_roundtrip() {
        let encoded = encode(format::CF_TEXT, &DdeData::from("r1c1 value")).unwrap();
        assert_eq!(
            decode(format::CF_TEXT, encoded),
            DdeData::Text("r1c1 value".into())
        );
    }
}
