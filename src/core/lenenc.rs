//! Bounds-checked payload cursor and length-encoded integers/strings.
//!
//! Length-encoded integer prefix byte:
//! ```text
//! 0x00..=0xFA  literal value
//! 0xFB         NULL marker (not a length)
//! 0xFC         2-byte little-endian value follows
//! 0xFD         3-byte little-endian value follows
//! 0xFE         8-byte little-endian value follows
//! 0xFF         error sentinel (never a length)
//! ```

use crate::error::{constants, ProbeError, Result};
use bytes::{BufMut, BytesMut};

pub const LENENC_NULL: u8 = 0xFB;
pub const LENENC_U16: u8 = 0xFC;
pub const LENENC_U24: u8 = 0xFD;
pub const LENENC_U64: u8 = 0xFE;
pub const ERROR_SENTINEL: u8 = 0xFF;

/// Reads fields front to back out of one frame payload.
///
/// Every read checks bounds and fails with a protocol error naming the
/// field instead of panicking on a short frame.
#[derive(Debug, Clone)]
pub struct PacketCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn bytes(&mut self, n: usize, field: &str) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ProbeError::truncated(field));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize, field: &str) -> Result<()> {
        self.bytes(n, field).map(|_| ())
    }

    pub fn u8(&mut self, field: &str) -> Result<u8> {
        Ok(self.bytes(1, field)?[0])
    }

    pub fn u16_le(&mut self, field: &str) -> Result<u16> {
        let b = self.bytes(2, field)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u16_be(&mut self, field: &str) -> Result<u16> {
        let b = self.bytes(2, field)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u24_le(&mut self, field: &str) -> Result<u32> {
        let b = self.bytes(3, field)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], 0]))
    }

    pub fn u32_le(&mut self, field: &str) -> Result<u32> {
        let b = self.bytes(4, field)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u32_be(&mut self, field: &str) -> Result<u32> {
        let b = self.bytes(4, field)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64_le(&mut self, field: &str) -> Result<u64> {
        let b = self.bytes(8, field)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    /// Bytes up to (not including) the next NUL; the NUL is consumed.
    pub fn null_terminated(&mut self, field: &str) -> Result<&'a [u8]> {
        let rest = &self.data[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| ProbeError::truncated(field))?;
        self.pos += end + 1;
        Ok(&rest[..end])
    }

    /// Bytes up to the next NUL, or to the end if none is present.
    pub fn null_terminated_or_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        match rest.iter().position(|&b| b == 0) {
            Some(end) => {
                self.pos += end + 1;
                &rest[..end]
            }
            None => {
                self.pos = self.data.len();
                rest
            }
        }
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    /// Length-encoded integer. `Ok(None)` is the NULL marker.
    pub fn lenenc_int(&mut self, field: &str) -> Result<Option<u64>> {
        let prefix = self.u8(field)?;
        match prefix {
            0x00..=0xFA => Ok(Some(u64::from(prefix))),
            LENENC_NULL => Ok(None),
            LENENC_U16 => Ok(Some(u64::from(self.u16_le(field)?))),
            LENENC_U24 => Ok(Some(u64::from(self.u24_le(field)?))),
            LENENC_U64 => Ok(Some(self.u64_le(field)?)),
            ERROR_SENTINEL => Err(ProbeError::Protocol(format!(
                "{}: {field}",
                constants::ERR_UNEXPECTED_ERROR_SENTINEL
            ))),
        }
    }

    /// Length-encoded integer where NULL is not allowed.
    pub fn lenenc_len(&mut self, field: &str) -> Result<u64> {
        self.lenenc_int(field)?.ok_or_else(|| {
            ProbeError::Protocol(format!("{}: {field}", constants::ERR_NULL_NOT_ALLOWED))
        })
    }

    /// Length-encoded string. `Ok(None)` is SQL NULL.
    pub fn lenenc_bytes(&mut self, field: &str) -> Result<Option<&'a [u8]>> {
        match self.lenenc_int(field)? {
            None => Ok(None),
            Some(len) => {
                let len = usize::try_from(len).map_err(|_| ProbeError::truncated(field))?;
                self.bytes(len, field).map(Some)
            }
        }
    }

    /// Fail if anything is left unread.
    pub fn finish(&self, what: &str) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ProbeError::Protocol(format!(
                "{} ({} bytes in {what})",
                constants::ERR_TRAILING_BYTES,
                self.remaining()
            )))
        }
    }
}

/// Append a length-encoded integer.
pub fn put_lenenc_int(dst: &mut BytesMut, value: u64) {
    match value {
        0..=0xFA => dst.put_u8(value as u8),
        0xFB..=0xFFFF => {
            dst.put_u8(LENENC_U16);
            dst.put_u16_le(value as u16);
        }
        0x1_0000..=0xFF_FFFF => {
            dst.put_u8(LENENC_U24);
            dst.put_slice(&(value as u32).to_le_bytes()[..3]);
        }
        _ => {
            dst.put_u8(LENENC_U64);
            dst.put_u64_le(value);
        }
    }
}

/// Append a length-encoded string.
pub fn put_lenenc_bytes(dst: &mut BytesMut, value: &[u8]) {
    put_lenenc_int(dst, value.len() as u64);
    dst.put_slice(value);
}
