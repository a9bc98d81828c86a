//! Order-Preserving Key Codecs
//!
//! Expiry metadata lives in the same ordered key space as everything else,
//! so the way its keys are encoded decides what a range scan returns. A codec
//! turns a path of [`Element`]s into bytes such that comparing two encoded
//! paths byte-wise gives the same answer as comparing the paths element by
//! element.
//!
//! Two strategies ship with the crate:
//!
//! - [`SeparatorCodec`]: human-readable `!ttl!x!1700000000000!key` paths.
//!   Timestamps are zero-padded to a fixed width so that lexicographic order
//!   matches numeric order.
//! - [`BinaryCodec`]: a tagged tuple encoding that accepts arbitrary key bytes.
//!
//! Callers with their own needs implement [`KeyCodec`] directly.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Width of a rendered timestamp in the separator codec.
pub const TIMESTAMP_WIDTH: usize = 13;

/// Largest instant the separator codec can render at [`TIMESTAMP_WIDTH`].
pub const MAX_TIMESTAMP: u64 = 9_999_999_999_999;

/// One component of an encoded path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Element<'a> {
    /// A namespace tag such as `ttl` or `x`
    Tag(&'a str),
    /// Milliseconds since the Unix epoch
    Timestamp(u64),
    /// An original application key
    Key(&'a [u8]),
}

/// Errors produced while encoding or decoding metadata keys and values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// An element contains the separator reserved for joining paths
    #[error("element contains the reserved separator {separator:?}")]
    ReservedSeparator { separator: char },

    /// A timestamp does not fit the fixed rendering width
    #[error("timestamp {0} exceeds the encodable range")]
    TimestampOutOfRange(u64),

    /// Stored bytes are not a value this codec produced
    #[error("malformed encoded value: {0}")]
    Malformed(String),
}

/// An order-preserving encoding for metadata keys and values.
///
/// For two paths `a` and `b` that first differ at position `i`,
/// `encode(a) < encode(b)` must hold exactly when `a[i] < b[i]`, and a path
/// must encode to a prefix of every path it is a prefix of.
pub trait KeyCodec: Send + Sync + std::fmt::Debug {
    /// Encodes a path of elements into a store key.
    fn encode(&self, path: &[Element<'_>]) -> Result<Bytes, CodecError>;

    /// Encodes a single element stored as a value.
    fn encode_value(&self, element: Element<'_>) -> Result<Bytes, CodecError>;

    /// Recovers an original key stored with `encode_value(Element::Key(..))`.
    fn decode_key(&self, raw: &[u8]) -> Result<Bytes, CodecError>;

    /// Recovers an instant stored with `encode_value(Element::Timestamp(..))`.
    fn decode_timestamp(&self, raw: &[u8]) -> Result<u64, CodecError>;
}

/// Joins stringified elements with a reserved separator.
///
/// Paths start with the separator unless the codec writes into an isolated
/// sub-namespace, matching the layout `!ttl!bar` / `!ttl!x!<ms>!bar`.
#[derive(Debug, Clone)]
pub struct SeparatorCodec {
    separator: u8,
    leading: bool,
}

impl SeparatorCodec {
    /// Creates a codec joining on `separator`, which must be ASCII.
    pub fn new(separator: char, leading: bool) -> Self {
        debug_assert!(separator.is_ascii());
        Self {
            separator: separator as u8,
            leading,
        }
    }

    fn check(&self, bytes: &[u8]) -> Result<(), CodecError> {
        if bytes.contains(&self.separator) {
            return Err(CodecError::ReservedSeparator {
                separator: self.separator as char,
            });
        }
        Ok(())
    }

    fn put_element(&self, out: &mut BytesMut, element: Element<'_>) -> Result<(), CodecError> {
        match element {
            Element::Tag(tag) => {
                self.check(tag.as_bytes())?;
                out.put_slice(tag.as_bytes());
            }
            Element::Key(key) => {
                self.check(key)?;
                out.put_slice(key);
            }
            Element::Timestamp(ms) => {
                if ms > MAX_TIMESTAMP {
                    return Err(CodecError::TimestampOutOfRange(ms));
                }
                out.put_slice(format!("{:0width$}", ms, width = TIMESTAMP_WIDTH).as_bytes());
            }
        }
        Ok(())
    }
}

impl KeyCodec for SeparatorCodec {
    fn encode(&self, path: &[Element<'_>]) -> Result<Bytes, CodecError> {
        let mut out = BytesMut::with_capacity(64);
        for (i, element) in path.iter().enumerate() {
            if i > 0 || self.leading {
                out.put_u8(self.separator);
            }
            self.put_element(&mut out, *element)?;
        }
        Ok(out.freeze())
    }

    fn encode_value(&self, element: Element<'_>) -> Result<Bytes, CodecError> {
        let mut out = BytesMut::new();
        self.put_element(&mut out, element)?;
        Ok(out.freeze())
    }

    fn decode_key(&self, raw: &[u8]) -> Result<Bytes, CodecError> {
        Ok(Bytes::copy_from_slice(raw))
    }

    fn decode_timestamp(&self, raw: &[u8]) -> Result<u64, CodecError> {
        std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| {
                CodecError::Malformed(format!(
                    "expected decimal timestamp, got {:?}",
                    String::from_utf8_lossy(raw)
                ))
            })
    }
}

/// Type tags for [`BinaryCodec`]. Their numeric order is part of the format.
mod tag {
    pub const KEY: u8 = 0x01;
    pub const TAG: u8 = 0x02;
    pub const TIMESTAMP: u8 = 0x14;
    pub const TERMINATOR: u8 = 0x00;
    pub const ESCAPE: u8 = 0xff;
}

/// A tagged tuple encoding over raw bytes.
///
/// Byte strings are written as `type, escaped bytes, 0x00` where every `0x00`
/// inside the data becomes `0x00 0xff`; timestamps are `0x14` followed by
/// eight big-endian bytes. No byte sequence is reserved, so any application
/// key can be armed.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl BinaryCodec {
    pub fn new() -> Self {
        Self
    }

    fn put_element(out: &mut BytesMut, element: Element<'_>) {
        match element {
            Element::Key(key) => Self::put_bytes(out, tag::KEY, key),
            Element::Tag(name) => Self::put_bytes(out, tag::TAG, name.as_bytes()),
            Element::Timestamp(ms) => {
                out.put_u8(tag::TIMESTAMP);
                out.put_u64(ms);
            }
        }
    }

    fn put_bytes(out: &mut BytesMut, kind: u8, data: &[u8]) {
        out.reserve(data.len() + 2);
        out.put_u8(kind);
        for &b in data {
            out.put_u8(b);
            if b == tag::TERMINATOR {
                out.put_u8(tag::ESCAPE);
            }
        }
        out.put_u8(tag::TERMINATOR);
    }

    fn read_bytes(raw: &[u8], kind: u8) -> Result<Bytes, CodecError> {
        match raw.first() {
            Some(&k) if k == kind => {}
            _ => return Err(CodecError::Malformed("unexpected type tag".into())),
        }

        let mut out = BytesMut::with_capacity(raw.len());
        let mut i = 1;
        while i < raw.len() {
            let b = raw[i];
            if b == tag::TERMINATOR {
                if raw.get(i + 1) == Some(&tag::ESCAPE) {
                    out.put_u8(tag::TERMINATOR);
                    i += 2;
                    continue;
                }
                if i + 1 != raw.len() {
                    return Err(CodecError::Malformed("trailing bytes after value".into()));
                }
                return Ok(out.freeze());
            }
            out.put_u8(b);
            i += 1;
        }
        Err(CodecError::Malformed("unterminated byte string".into()))
    }
}

impl KeyCodec for BinaryCodec {
    fn encode(&self, path: &[Element<'_>]) -> Result<Bytes, CodecError> {
        let mut out = BytesMut::with_capacity(64);
        for element in path {
            Self::put_element(&mut out, *element);
        }
        Ok(out.freeze())
    }

    fn encode_value(&self, element: Element<'_>) -> Result<Bytes, CodecError> {
        self.encode(&[element])
    }

    fn decode_key(&self, raw: &[u8]) -> Result<Bytes, CodecError> {
        Self::read_bytes(raw, tag::KEY)
    }

    fn decode_timestamp(&self, raw: &[u8]) -> Result<u64, CodecError> {
        match raw {
            [tag::TIMESTAMP, rest @ ..] if rest.len() == 8 => {
                let mut be = [0u8; 8];
                be.copy_from_slice(rest);
                Ok(u64::from_be_bytes(be))
            }
            _ => Err(CodecError::Malformed("expected tagged timestamp".into())),
        }
    }
}
