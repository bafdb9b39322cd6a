//! Split tokens.
//!
//! A split is the query engine's unit of parallelism: an opaque byte
//! token naming a contiguous key range, plus the time range rows must
//! satisfy. The server issues tokens from split enumeration and accepts
//! them back verbatim on the read path; clients never interpret them.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, StoreError};

/// Target split size in value bytes.
pub const SPLIT_TARGET_BYTES: usize = 16 * 1024 * 1024;

const TOKEN_VERSION: u8 = 1;

/// A contiguous `[low, high)` key range with its row-level time bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub low: Vec<u8>,
    pub high: Vec<u8>,
    pub t0: i64,
    pub t1: i64,
}

impl Split {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(1 + 4 + self.low.len() + self.high.len() + 16);
        buf.put_u8(TOKEN_VERSION);
        buf.put_u16(self.low.len() as u16);
        buf.put_slice(&self.low);
        buf.put_u16(self.high.len() as u16);
        buf.put_slice(&self.high);
        buf.put_i64(self.t0);
        buf.put_i64(self.t1);
        buf.to_vec()
    }

    pub fn decode(token: &[u8]) -> Result<Split> {
        let mut buf = token;
        if buf.remaining() < 1 || buf.get_u8() != TOKEN_VERSION {
            return Err(StoreError::InvalidSplit);
        }
        let low = get_bytes16(&mut buf)?;
        let high = get_bytes16(&mut buf)?;
        if buf.remaining() != 16 {
            return Err(StoreError::InvalidSplit);
        }
        let t0 = buf.get_i64();
        let t1 = buf.get_i64();
        Ok(Split { low, high, t0, t1 })
    }
}

fn get_bytes16(buf: &mut impl Buf) -> Result<Vec<u8>> {
    if buf.remaining() < 2 {
        return Err(StoreError::InvalidSplit);
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(StoreError::InvalidSplit);
    }
    Ok(buf.copy_to_bytes(len).to_vec())
}
