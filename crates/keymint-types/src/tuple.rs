//! Order-preserving tuple encoding for persistent keys and values.
//!
//! Every element is tagged and self-delimiting, so concatenated elements
//! form a key whose unsigned-byte ordering matches element-wise ordering:
//!
//! | Tag           | Meaning                                        |
//! |---------------|------------------------------------------------|
//! | `0x00`        | Nil (absent value)                             |
//! | `0x01`        | Byte string, `0x00`-escaped, `0x00`-terminated |
//! | `0x02`        | UTF-8 string, same framing as byte strings     |
//! | `0x14 + n`    | Unsigned integer, `n` big-endian bytes          |
//!
//! Integers use the minimal byte length (`0x14` alone is zero), so a shorter
//! encoding always sorts before a longer one and `memcmp` order equals
//! numeric order. Embedded `0x00` bytes in strings are escaped as
//! `0x00 0xFF`, which sorts after the bare `0x00` terminator, so a string
//! sorts before any of its extensions.

use std::fmt;

/// Tag for the nil element.
pub const NIL: u8 = 0x00;
/// Tag for a byte-string element.
pub const BYTES: u8 = 0x01;
/// Tag for a UTF-8 string element.
pub const STRING: u8 = 0x02;
/// Base tag for unsigned integers; `INT_BASE + n` carries `n` payload bytes.
pub const INT_BASE: u8 = 0x14;

const ESCAPE: u8 = 0xFF;
const TERMINATOR: u8 = 0x00;

/// A single tuple element.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Element {
    /// Absent value; used for missing metadata.
    Nil,
    /// Raw byte string.
    Bytes(Vec<u8>),
    /// UTF-8 string.
    Str(String),
    /// Unsigned 64-bit integer.
    U64(u64),
}

impl Element {
    /// The integer payload, if this element is an integer.
    #[must_use]
    pub const fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U64(v) => Some(*v),
            _ => None,
        }
    }

    /// The string payload, if this element is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The byte payload, if this element is a byte string.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Append this element's encoding to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::Nil => out.push(NIL),
            Self::Bytes(b) => {
                out.push(BYTES);
                encode_escaped(b, out);
            }
            Self::Str(s) => {
                out.push(STRING);
                encode_escaped(s.as_bytes(), out);
            }
            Self::U64(v) => {
                let bytes = v.to_be_bytes();
                let skip = v.leading_zeros() as usize / 8;
                let len = 8 - skip;
                #[allow(clippy::cast_possible_truncation)]
                out.push(INT_BASE + len as u8);
                out.extend_from_slice(&bytes[skip..]);
            }
        }
    }
}

fn encode_escaped(payload: &[u8], out: &mut Vec<u8>) {
    for &b in payload {
        out.push(b);
        if b == TERMINATOR {
            out.push(ESCAPE);
        }
    }
    out.push(TERMINATOR);
}

/// Error produced when decoding a tuple element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeError {
    /// Byte offset at which decoding failed.
    pub offset: usize,
    /// What went wrong.
    pub detail: &'static str,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tuple decode failed at offset {}: {}", self.offset, self.detail)
    }
}

impl std::error::Error for DecodeError {}

/// Encode a sequence of elements into one byte string.
#[must_use]
pub fn pack(elements: &[Element]) -> Vec<u8> {
    let mut out = Vec::new();
    for element in elements {
        element.encode_into(&mut out);
    }
    out
}

/// Decode one element starting at `offset`, returning it and the offset of
/// the following element.
pub fn decode_one(buf: &[u8], offset: usize) -> Result<(Element, usize), DecodeError> {
    let tag = *buf.get(offset).ok_or(DecodeError {
        offset,
        detail: "truncated: missing tag",
    })?;
    match tag {
        NIL => Ok((Element::Nil, offset + 1)),
        BYTES | STRING => {
            let (payload, next) = decode_escaped(buf, offset + 1)?;
            if tag == BYTES {
                Ok((Element::Bytes(payload), next))
            } else {
                let s = String::from_utf8(payload).map_err(|_| DecodeError {
                    offset,
                    detail: "string element is not valid UTF-8",
                })?;
                Ok((Element::Str(s), next))
            }
        }
        t if (INT_BASE..=INT_BASE + 8).contains(&t) => {
            let len = (t - INT_BASE) as usize;
            let end = offset + 1 + len;
            let payload = buf.get(offset + 1..end).ok_or(DecodeError {
                offset,
                detail: "truncated integer payload",
            })?;
            let mut bytes = [0u8; 8];
            bytes[8 - len..].copy_from_slice(payload);
            Ok((Element::U64(u64::from_be_bytes(bytes)), end))
        }
        _ => Err(DecodeError {
            offset,
            detail: "unknown element tag",
        }),
    }
}

fn decode_escaped(buf: &[u8], start: usize) -> Result<(Vec<u8>, usize), DecodeError> {
    let mut payload = Vec::new();
    let mut i = start;
    loop {
        let b = *buf.get(i).ok_or(DecodeError {
            offset: i,
            detail: "truncated: unterminated string",
        })?;
        if b == TERMINATOR {
            if buf.get(i + 1) == Some(&ESCAPE) {
                payload.push(TERMINATOR);
                i += 2;
            } else {
                return Ok((payload, i + 1));
            }
        } else {
            payload.push(b);
            i += 1;
        }
    }
}

/// Decode a complete byte string into its elements.
///
/// Fails if any trailing bytes remain undecodable.
pub fn unpack(buf: &[u8]) -> Result<Vec<Element>, DecodeError> {
    let mut elements = Vec::new();
    let mut offset = 0;
    while offset < buf.len() {
        let (element, next) = decode_one(buf, offset)?;
        elements.push(element);
        offset = next;
    }
    Ok(elements)
}

/// Encode a single string element.
#[must_use]
pub fn pack_str(s: &str) -> Vec<u8> {
    pack(&[Element::Str(s.to_owned())])
}

/// Encode a single integer element.
#[must_use]
pub fn pack_u64(v: u64) -> Vec<u8> {
    pack(&[Element::U64(v)])
}
