//! Binary RPC framing
//!
//! Length-prefixed frames, client ↔ server:
//!
//! ```text
//! struct Header {
//!   u32 magic      = 0xEEDD1132
//!   u16 version
//!   u8  compressed   // 1 => body is compressed after the header
//!   u8  cmd
//!   u32 seq          // caller-chosen sequence number
//!   u32 len          // payload bytes that follow
//! }
//! ```
//!
//! All integers little-endian. The compressed flag is decoded but a
//! compressed body is rejected: the codec dependency is deliberately not
//! carried, and peers are expected to negotiate compression off.

use crate::error::{ProtoError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const MAGIC: u32 = 0xEEDD_1132;
pub const PROTO_VERSION: u16 = 4;
/// Oldest protocol version this node still speaks
pub const MIN_COMPAT_VERSION: u16 = 2;
pub const HEADER_SIZE: usize = 16;

/// Command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cmd {
    Login = 1,
    Ping = 2,
    Select = 16,
    FetchResults = 17,
    GetSnapshot = 24,
}

impl Cmd {
    pub fn from_u8(v: u8) -> Option<Cmd> {
        match v {
            1 => Some(Cmd::Login),
            2 => Some(Cmd::Ping),
            16 => Some(Cmd::Select),
            17 => Some(Cmd::FetchResults),
            24 => Some(Cmd::GetSnapshot),
            _ => None,
        }
    }
}

/// Frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u16,
    pub compressed: bool,
    pub cmd: u8,
    pub seq: u32,
    pub len: u32,
}

impl Header {
    pub fn new(cmd: u8, seq: u32, len: u32) -> Self {
        Self {
            version: PROTO_VERSION,
            compressed: false,
            cmd,
            seq,
            len,
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u32_le(MAGIC);
        dst.put_u16_le(self.version);
        dst.put_u8(self.compressed as u8);
        dst.put_u8(self.cmd);
        dst.put_u32_le(self.seq);
        dst.put_u32_le(self.len);
    }

    pub fn decode(src: &mut Bytes) -> Result<Header> {
        if src.len() < HEADER_SIZE {
            return Err(ProtoError::ProtocolMismatch(format!(
                "short header: {} bytes",
                src.len()
            )));
        }
        let magic = src.get_u32_le();
        if magic != MAGIC {
            return Err(ProtoError::ProtocolMismatch(format!(
                "bad magic {:#010x}",
                magic
            )));
        }
        let version = src.get_u16_le();
        if version < MIN_COMPAT_VERSION {
            return Err(ProtoError::ProtocolMismatch(format!(
                "protocol version {} is older than minimum {}",
                version, MIN_COMPAT_VERSION
            )));
        }
        let compressed = src.get_u8() != 0;
        let cmd = src.get_u8();
        let seq = src.get_u32_le();
        let len = src.get_u32_le();
        if compressed {
            return Err(ProtoError::ProtocolMismatch(
                "compressed bodies are not supported".into(),
            ));
        }
        Ok(Header {
            version,
            compressed,
            cmd,
            seq,
            len,
        })
    }
}

/// Assemble a full frame: header + payload
pub fn encode_frame(cmd: u8, seq: u32, payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    Header::new(cmd, seq, payload.len() as u32).encode(&mut out);
    out.put_slice(payload);
    out.freeze()
}

/// Split a frame into its header and payload
pub fn decode_frame(mut frame: Bytes) -> Result<(Header, Bytes)> {
    let header = Header::decode(&mut frame)?;
    if frame.len() < header.len as usize {
        return Err(ProtoError::ProtocolMismatch(format!(
            "truncated payload: {} of {} bytes",
            frame.len(),
            header.len
        )));
    }
    Ok((header, frame.split_to(header.len as usize)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let frame = encode_frame(Cmd::Select as u8, 42, b"hello");
        let (h, body) = decode_frame(frame).unwrap();
        assert_eq!(h.cmd, Cmd::Select as u8);
        assert_eq!(h.seq, 42);
        assert_eq!(h.len, 5);
        assert_eq!(&body[..], b"hello");
    }

    #[test]
    fn bad_magic_rejected() {
        let mut raw = BytesMut::new();
        raw.put_u32_le(0xBAD0_BAD0);
        raw.put_slice(&[0u8; 12]);
        let err = decode_frame(raw.freeze()).unwrap_err();
        assert!(matches!(err, ProtoError::ProtocolMismatch(_)));
    }

    #[test]
    fn old_version_rejected() {
        let mut raw = BytesMut::new();
        raw.put_u32_le(MAGIC);
        raw.put_u16_le(1);
        raw.put_slice(&[0u8; 10]);
        let err = decode_frame(raw.freeze()).unwrap_err();
        assert!(matches!(err, ProtoError::ProtocolMismatch(_)));
    }

    #[test]
    fn compressed_body_rejected() {
        let mut raw = BytesMut::new();
        raw.put_u32_le(MAGIC);
        raw.put_u16_le(PROTO_VERSION);
        raw.put_u8(1); // compressed
        raw.put_u8(Cmd::Ping as u8);
        raw.put_u32_le(7);
        raw.put_u32_le(0);
        let err = decode_frame(raw.freeze()).unwrap_err();
        assert!(matches!(err, ProtoError::ProtocolMismatch(_)));
    }
}
