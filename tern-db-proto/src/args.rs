//! Tagged argument codec
//!
//! A frame body is one or more argument lists. Each list is a varint count
//! followed by tagged values; each value is a tag byte then its encoding.
//! Two lists are appended per request: the command arguments, then the
//! call context `{exec_timeout_ms, lsn, server_id, shard_id}`. Responses
//! carry `{error_code, error_msg, args...}`.

use crate::error::{ProtoError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tern_db_core::Error as CoreError;

/// One wire argument
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Varint(i64),
    Double(f64),
    Str(String),
    Bool(bool),
    Null,
}

impl Arg {
    fn tag(&self) -> u8 {
        match self {
            Arg::Varint(_) => 0,
            Arg::Double(_) => 1,
            Arg::Str(_) => 2,
            Arg::Bool(_) => 3,
            Arg::Null => 4,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Arg::Varint(v) => Some(*v),
            Arg::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Arg::Varint(v)
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Arg::Str(v.to_string())
    }
}

impl From<bool> for Arg {
    fn from(v: bool) -> Self {
        Arg::Bool(v)
    }
}

fn zigzag_encode(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn zigzag_decode(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// LEB128 unsigned varint
pub fn put_uvarint(dst: &mut BytesMut, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            dst.put_u8(byte);
            return;
        }
        dst.put_u8(byte | 0x80);
    }
}

pub fn get_uvarint(src: &mut Bytes) -> Result<u64> {
    let mut out: u64 = 0;
    let mut shift = 0;
    loop {
        if !src.has_remaining() {
            return Err(ProtoError::ProtocolMismatch("truncated varint".into()));
        }
        let byte = src.get_u8();
        out |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(out);
        }
        shift += 7;
        if shift >= 64 {
            return Err(ProtoError::ProtocolMismatch("varint overflow".into()));
        }
    }
}

fn put_varint(dst: &mut BytesMut, v: i64) {
    put_uvarint(dst, zigzag_encode(v));
}

fn get_varint(src: &mut Bytes) -> Result<i64> {
    Ok(zigzag_decode(get_uvarint(src)?))
}

/// Encode one argument list
pub fn encode_args(dst: &mut BytesMut, args: &[Arg]) {
    put_uvarint(dst, args.len() as u64);
    for arg in args {
        dst.put_u8(arg.tag());
        match arg {
            Arg::Varint(v) => put_varint(dst, *v),
            Arg::Double(d) => dst.put_f64_le(*d),
            Arg::Str(s) => {
                put_uvarint(dst, s.len() as u64);
                dst.put_slice(s.as_bytes());
            }
            Arg::Bool(b) => dst.put_u8(*b as u8),
            Arg::Null => {}
        }
    }
}

/// Decode one argument list
pub fn decode_args(src: &mut Bytes) -> Result<Vec<Arg>> {
    let count = get_uvarint(src)? as usize;
    let mut out = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        if !src.has_remaining() {
            return Err(ProtoError::ProtocolMismatch("truncated argument".into()));
        }
        let tag = src.get_u8();
        out.push(match tag {
            0 => Arg::Varint(get_varint(src)?),
            1 => {
                if src.remaining() < 8 {
                    return Err(ProtoError::ProtocolMismatch("truncated double".into()));
                }
                Arg::Double(src.get_f64_le())
            }
            2 => {
                let len = get_uvarint(src)? as usize;
                if src.remaining() < len {
                    return Err(ProtoError::ProtocolMismatch("truncated string".into()));
                }
                let bytes = src.split_to(len);
                Arg::Str(String::from_utf8(bytes.to_vec()).map_err(|_| {
                    ProtoError::ProtocolMismatch("non-utf8 string argument".into())
                })?)
            }
            3 => {
                if !src.has_remaining() {
                    return Err(ProtoError::ProtocolMismatch("truncated bool".into()));
                }
                Arg::Bool(src.get_u8() != 0)
            }
            4 => Arg::Null,
            other => {
                return Err(ProtoError::ProtocolMismatch(format!(
                    "unknown argument tag {}",
                    other
                )))
            }
        });
    }
    Ok(out)
}

/// Call context appended after the command arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallContext {
    pub exec_timeout_ms: i64,
    pub lsn: i64,
    pub server_id: i64,
    pub shard_id: i64,
}

impl CallContext {
    pub fn encode(&self, dst: &mut BytesMut) {
        encode_args(
            dst,
            &[
                Arg::Varint(self.exec_timeout_ms),
                Arg::Varint(self.lsn),
                Arg::Varint(self.server_id),
                Arg::Varint(self.shard_id),
            ],
        );
    }

    pub fn decode(src: &mut Bytes) -> Result<CallContext> {
        let args = decode_args(src)?;
        let at = |i: usize| -> i64 { args.get(i).and_then(Arg::as_i64).unwrap_or(0) };
        Ok(CallContext {
            exec_timeout_ms: at(0),
            lsn: at(1),
            server_id: at(2),
            shard_id: at(3),
        })
    }
}

/// Request body: command arguments + call context
pub fn encode_request(args: &[Arg], ctx: &CallContext) -> Bytes {
    let mut out = BytesMut::new();
    encode_args(&mut out, args);
    ctx.encode(&mut out);
    out.freeze()
}

pub fn decode_request(mut body: Bytes) -> Result<(Vec<Arg>, CallContext)> {
    let args = decode_args(&mut body)?;
    let ctx = CallContext::decode(&mut body)?;
    Ok((args, ctx))
}

/// Response body: `{error_code, error_msg, args...}`
pub fn encode_response(err: Option<&CoreError>, args: &[Arg]) -> Bytes {
    let mut out = BytesMut::new();
    let (code, msg) = match err {
        Some(e) => (e.code() as i64, e.to_string()),
        None => (0, String::new()),
    };
    put_uvarint(&mut out, code as u64);
    put_uvarint(&mut out, msg.len() as u64);
    out.put_slice(msg.as_bytes());
    encode_args(&mut out, args);
    out.freeze()
}

pub fn decode_response(mut body: Bytes) -> Result<Vec<Arg>> {
    let code = get_uvarint(&mut body)?;
    let msg_len = get_uvarint(&mut body)? as usize;
    if body.remaining() < msg_len {
        return Err(ProtoError::ProtocolMismatch("truncated error message".into()));
    }
    let msg_bytes = body.split_to(msg_len);
    if code != 0 {
        let msg = String::from_utf8_lossy(&msg_bytes).to_string();
        return Err(ProtoError::Core(CoreError::from_code(code as u32, msg)));
    }
    decode_args(&mut body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_round_trip() {
        let args = vec![
            Arg::Varint(-42),
            Arg::Double(2.5),
            Arg::Str("books".into()),
            Arg::Bool(true),
            Arg::Null,
        ];
        let mut buf = BytesMut::new();
        encode_args(&mut buf, &args);
        let got = decode_args(&mut buf.freeze()).unwrap();
        assert_eq!(got, args);
    }

    #[test]
    fn varint_extremes() {
        for v in [0i64, 1, -1, i64::MAX, i64::MIN, 300, -300] {
            let mut buf = BytesMut::new();
            put_varint(&mut buf, v);
            assert_eq!(get_varint(&mut buf.freeze()).unwrap(), v);
        }
    }

    #[test]
    fn request_round_trip() {
        let ctx = CallContext {
            exec_timeout_ms: 50,
            lsn: 7,
            server_id: 2,
            shard_id: -1,
        };
        let body = encode_request(&[Arg::Str("q".into())], &ctx);
        let (args, got_ctx) = decode_request(body).unwrap();
        assert_eq!(args, vec![Arg::Str("q".into())]);
        assert_eq!(got_ctx, ctx);
    }

    #[test]
    fn response_carries_error_codes() {
        let body = encode_response(Some(&CoreError::Timeout("late".into())), &[]);
        let err = decode_response(body).unwrap_err();
        match err {
            ProtoError::Core(e) => assert_eq!(e.code(), CoreError::Timeout(String::new()).code()),
            other => panic!("unexpected: {:?}", other),
        }

        let ok = encode_response(None, &[Arg::Varint(3)]);
        assert_eq!(decode_response(ok).unwrap(), vec![Arg::Varint(3)]);
    }
}
