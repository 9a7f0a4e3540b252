//! Binary wire protocol for the synchronization relay.
//!
//! Every frame starts with a varuint message-kind tag followed by a
//! varuint-length-prefixed payload:
//!
//! - `0` sync-step-1: the sender's state vector
//! - `1` sync-step-2 / update: CRDT update bytes
//! - `2` awareness: an encoded presence delta
//!
//! Tags >= 3 are reserved. The relay never interprets sync payloads; it only
//! stores, diffs and forwards them.

use std::fmt;

/// Errors produced while decoding wire frames or presence deltas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Ran out of bytes mid-frame.
    UnexpectedEof,
    /// A varuint did not terminate within 64 bits.
    VarIntOverflow,
    /// A var-string payload was not valid UTF-8.
    InvalidUtf8,
    /// The CRDT library rejected a state vector or update payload.
    Crdt(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::UnexpectedEof => write!(f, "unexpected end of frame"),
            ProtocolError::VarIntOverflow => write!(f, "varuint exceeds 64 bits"),
            ProtocolError::InvalidUtf8 => write!(f, "payload is not valid UTF-8"),
            ProtocolError::Crdt(e) => write!(f, "CRDT payload rejected: {}", e),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Append a varuint (unsigned LEB128) to `buf`.
pub fn write_var_uint(buf: &mut Vec<u8>, mut n: u64) {
    loop {
        let byte = (n & 0x7f) as u8;
        n >>= 7;
        if n == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Append a length-prefixed byte string to `buf`.
pub fn write_var_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_var_uint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Append a length-prefixed UTF-8 string to `buf`.
pub fn write_var_string(buf: &mut Vec<u8>, s: &str) {
    write_var_bytes(buf, s.as_bytes());
}

/// Cursor over a received frame.
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn read_byte(&mut self) -> Result<u8, ProtocolError> {
        let b = *self.buf.get(self.pos).ok_or(ProtocolError::UnexpectedEof)?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_var_uint(&mut self) -> Result<u64, ProtocolError> {
        let mut value: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            let byte = self.read_byte()?;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift > 63 {
                return Err(ProtocolError::VarIntOverflow);
            }
        }
    }

    pub fn read_var_bytes(&mut self) -> Result<&'a [u8], ProtocolError> {
        let len = usize::try_from(self.read_var_uint()?)
            .map_err(|_| ProtocolError::VarIntOverflow)?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|e| *e <= self.buf.len())
            .ok_or(ProtocolError::UnexpectedEof)?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_var_string(&mut self) -> Result<&'a str, ProtocolError> {
        std::str::from_utf8(self.read_var_bytes()?).map_err(|_| ProtocolError::InvalidUtf8)
    }
}

pub const TAG_SYNC_STEP1: u64 = 0;
pub const TAG_SYNC_STEP2: u64 = 1;
pub const TAG_AWARENESS: u64 = 2;

/// A decoded relay frame. Payloads stay opaque at this layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A peer's state vector; answered privately with the matching diff.
    SyncStep1(Vec<u8>),
    /// CRDT update bytes; applied to the room document and fanned out.
    SyncStep2(Vec<u8>),
    /// An encoded presence delta; applied to the presence table and fanned out.
    Awareness(Vec<u8>),
    /// Reserved tag; dropped without closing the connection.
    Unknown(u64),
}

impl Frame {
    pub fn decode(bytes: &[u8]) -> Result<Frame, ProtocolError> {
        let mut dec = Decoder::new(bytes);
        let tag = dec.read_var_uint()?;
        match tag {
            TAG_SYNC_STEP1 => Ok(Frame::SyncStep1(dec.read_var_bytes()?.to_vec())),
            TAG_SYNC_STEP2 => Ok(Frame::SyncStep2(dec.read_var_bytes()?.to_vec())),
            TAG_AWARENESS => Ok(Frame::Awareness(dec.read_var_bytes()?.to_vec())),
            other => Ok(Frame::Unknown(other)),
        }
    }
}

pub fn encode_sync_step1(state_vector: &[u8]) -> Vec<u8> {
    encode_frame(TAG_SYNC_STEP1, state_vector)
}

pub fn encode_sync_step2(update: &[u8]) -> Vec<u8> {
    encode_frame(TAG_SYNC_STEP2, update)
}

pub fn encode_awareness(delta: &[u8]) -> Vec<u8> {
    encode_frame(TAG_AWARENESS, delta)
}

fn encode_frame(tag: u64, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + 8);
    write_var_uint(&mut buf, tag);
    write_var_bytes(&mut buf, payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_uint_roundtrip() {
        for n in [0u64, 1, 127, 128, 300, 16_384, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            write_var_uint(&mut buf, n);
            let mut dec = Decoder::new(&buf);
            assert_eq!(dec.read_var_uint().unwrap(), n);
            assert_eq!(dec.remaining(), 0);
        }
    }

    #[test]
    fn frame_roundtrip_all_kinds() {
        let payload = vec![9u8, 8, 7, 6];
        assert_eq!(
            Frame::decode(&encode_sync_step1(&payload)).unwrap(),
            Frame::SyncStep1(payload.clone())
        );
        assert_eq!(
            Frame::decode(&encode_sync_step2(&payload)).unwrap(),
            Frame::SyncStep2(payload.clone())
        );
        assert_eq!(
            Frame::decode(&encode_awareness(&payload)).unwrap(),
            Frame::Awareness(payload)
        );
    }

    #[test]
    fn unknown_tags_are_preserved_not_errors() {
        let mut buf = Vec::new();
        write_var_uint(&mut buf, 7);
        write_var_bytes(&mut buf, b"whatever");
        assert_eq!(Frame::decode(&buf).unwrap(), Frame::Unknown(7));
    }

    #[test]
    fn truncated_frame_fails() {
        let mut buf = Vec::new();
        write_var_uint(&mut buf, TAG_SYNC_STEP2);
        write_var_uint(&mut buf, 100); // claims 100 bytes, provides none
        assert_eq!(Frame::decode(&buf), Err(ProtocolError::UnexpectedEof));
    }

    #[test]
    fn empty_frame_fails() {
        assert_eq!(Frame::decode(&[]), Err(ProtocolError::UnexpectedEof));
    }

    #[test]
    fn overlong_var_uint_fails() {
        let buf = [0x80u8; 11];
        let mut dec = Decoder::new(&buf);
        assert_eq!(dec.read_var_uint(), Err(ProtocolError::VarIntOverflow));
    }

    #[test]
    fn var_string_rejects_bad_utf8() {
        let mut buf = Vec::new();
        write_var_bytes(&mut buf, &[0xff, 0xfe]);
        let mut dec = Decoder::new(&buf);
        assert_eq!(dec.read_var_string(), Err(ProtocolError::InvalidUtf8));
    }
}
