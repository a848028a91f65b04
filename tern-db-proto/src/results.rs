//! Query result payload
//!
//! The `Select`/`FetchResults` response body: global result parameters,
//! per-namespace schema coordinates, then `count` item headers. Item bodies
//! travel in the format the flags select; the `Pure` format carries no body
//! at all.

use crate::args::{get_uvarint, put_uvarint};
use crate::error::{ProtoError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Result payload format selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ResultFormat {
    /// Internal compact tagged format
    CJson = 0,
    Json = 1,
    MsgPack = 2,
    /// Id/rank only, no document body
    Pure = 3,
}

impl ResultFormat {
    pub fn from_flags(flags: u32) -> ResultFormat {
        match flags & 0x3 {
            0 => ResultFormat::CJson,
            1 => ResultFormat::Json,
            2 => ResultFormat::MsgPack,
            _ => ResultFormat::Pure,
        }
    }
}

/// Per-namespace schema coordinates shipped with results
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsParams {
    pub state_token: u32,
    pub tm_version: u32,
}

/// Global result parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RawQueryParams {
    /// Total matched rows when the query requested a count
    pub total: u64,
    pub qcount: u64,
    /// Items in this batch
    pub count: u64,
    pub flags: u32,
    pub namespaces: Vec<NsParams>,
}

impl RawQueryParams {
    pub fn encode(&self, dst: &mut BytesMut) {
        put_uvarint(dst, self.total);
        put_uvarint(dst, self.qcount);
        put_uvarint(dst, self.count);
        dst.put_u32_le(self.flags);
        put_uvarint(dst, self.namespaces.len() as u64);
        for ns in &self.namespaces {
            dst.put_u32_le(ns.state_token);
            dst.put_u32_le(ns.tm_version);
        }
    }

    pub fn decode(src: &mut Bytes) -> Result<RawQueryParams> {
        let total = get_uvarint(src)?;
        let qcount = get_uvarint(src)?;
        let count = get_uvarint(src)?;
        if src.remaining() < 4 {
            return Err(ProtoError::ProtocolMismatch("truncated result flags".into()));
        }
        let flags = src.get_u32_le();
        let ns_count = get_uvarint(src)? as usize;
        let mut namespaces = Vec::with_capacity(ns_count.min(64));
        for _ in 0..ns_count {
            if src.remaining() < 8 {
                return Err(ProtoError::ProtocolMismatch(
                    "truncated namespace params".into(),
                ));
            }
            namespaces.push(NsParams {
                state_token: src.get_u32_le(),
                tm_version: src.get_u32_le(),
            });
        }
        Ok(RawQueryParams {
            total,
            qcount,
            count,
            flags,
            namespaces,
        })
    }
}

/// One item header preceding its (format-specific) body
#[derive(Debug, Clone, PartialEq)]
pub struct ItemParams {
    pub id: u64,
    pub version: u64,
    pub nsid: u32,
    /// Rank scaled by 1000, zero for non-ranked queries
    pub proc: u32,
    pub raw: bool,
    pub body: Bytes,
}

impl ItemParams {
    pub fn encode(&self, dst: &mut BytesMut) {
        put_uvarint(dst, self.id);
        put_uvarint(dst, self.version);
        put_uvarint(dst, u64::from(self.nsid));
        put_uvarint(dst, u64::from(self.proc));
        dst.put_u8(self.raw as u8);
        put_uvarint(dst, self.body.len() as u64);
        dst.put_slice(&self.body);
    }

    pub fn decode(src: &mut Bytes) -> Result<ItemParams> {
        let id = get_uvarint(src)?;
        let version = get_uvarint(src)?;
        let nsid = get_uvarint(src)? as u32;
        let proc = get_uvarint(src)? as u32;
        if !src.has_remaining() {
            return Err(ProtoError::ProtocolMismatch("truncated item header".into()));
        }
        let raw = src.get_u8() != 0;
        let body_len = get_uvarint(src)? as usize;
        if src.remaining() < body_len {
            return Err(ProtoError::ProtocolMismatch("truncated item body".into()));
        }
        let body = src.split_to(body_len);
        Ok(ItemParams {
            id,
            version,
            nsid,
            proc,
            raw,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_round_trip() {
        let params = RawQueryParams {
            total: 100,
            qcount: 100,
            count: 2,
            flags: 1,
            namespaces: vec![NsParams {
                state_token: 7,
                tm_version: 3,
            }],
        };
        let mut buf = BytesMut::new();
        params.encode(&mut buf);

        let item = ItemParams {
            id: 12,
            version: 1,
            nsid: 0,
            proc: 950,
            raw: false,
            body: Bytes::from_static(b"{\"id\":12}"),
        };
        item.encode(&mut buf);

        let mut src = buf.freeze();
        let got = RawQueryParams::decode(&mut src).unwrap();
        assert_eq!(got, params);
        let got_item = ItemParams::decode(&mut src).unwrap();
        assert_eq!(got_item, item);
        assert!(!src.has_remaining());
    }

    #[test]
    fn format_from_flags() {
        assert_eq!(ResultFormat::from_flags(0), ResultFormat::CJson);
        assert_eq!(ResultFormat::from_flags(1), ResultFormat::Json);
        assert_eq!(ResultFormat::from_flags(2), ResultFormat::MsgPack);
        assert_eq!(ResultFormat::from_flags(3), ResultFormat::Pure);
    }
}
