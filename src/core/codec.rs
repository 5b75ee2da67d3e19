//! Tokio codecs for the length-prefixed frame formats sessions speak.
//!
//! Both decoders leave the source buffer untouched until a complete frame is
//! present, so partial frames survive across reads.

use crate::config::MAX_FRAME_SIZE;
use crate::core::message::ProtocolMessage;
use crate::error::{ProbeError, Result};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// MySQL packet header: 3-byte little-endian payload length, 1-byte sequence id
pub const MYSQL_HEADER_LEN: usize = 4;

/// Largest payload one MySQL packet can carry. A packet of exactly this
/// size continues in the next one.
pub const MYSQL_MAX_PAYLOAD: usize = 0x00FF_FFFF;

/// TPKT header: version 3, reserved, 2-byte big-endian total length
pub const TPKT_HEADER_LEN: usize = 4;
pub const TPKT_VERSION: u8 = 3;

/// Wire packets (and so sequence ids) a logical payload of `len` bytes takes.
pub fn mysql_packet_count(len: usize) -> usize {
    len / MYSQL_MAX_PAYLOAD + 1
}

/// MySQL packets, with continuation chains joined into one message.
///
/// A decoded message carries the sequence id of the chain's first packet and
/// the joined payload. `max_frame_size` bounds the joined payload.
#[derive(Debug, Clone, Copy)]
pub struct MySqlPacketCodec {
    max_frame_size: usize,
}

impl MySqlPacketCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// This codec with its limit lowered to `limit` if that is smaller
    pub fn capped_at(self, limit: usize) -> Self {
        Self::new(self.max_frame_size.min(limit))
    }
}

impl Default for MySqlPacketCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

fn mysql_payload_len(header: &[u8]) -> usize {
    u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize
}

impl Decoder for MySqlPacketCodec {
    type Item = ProtocolMessage;
    type Error = ProbeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ProtocolMessage>> {
        if src.len() < MYSQL_HEADER_LEN {
            return Ok(None);
        }
        let first_sequence = src[3];

        // Walk the chain without consuming until its last packet is buffered.
        let mut offset = 0;
        let mut total = 0;
        let mut packets = 0;
        loop {
            if src.len() < offset + MYSQL_HEADER_LEN {
                return Ok(None);
            }
            let len = mysql_payload_len(&src[offset..]);
            let sequence = src[offset + 3];
            let expected = first_sequence.wrapping_add(packets as u8);
            if sequence != expected {
                return Err(ProbeError::Protocol(format!(
                    "continuation packet out of order: expected sequence {expected}, got {sequence}"
                )));
            }

            total += len;
            if total > self.max_frame_size {
                return Err(ProbeError::OversizedFrame(total));
            }

            let end = offset + MYSQL_HEADER_LEN + len;
            if src.len() < end {
                src.reserve(end - src.len());
                return Ok(None);
            }
            packets += 1;
            offset = end;
            if len < MYSQL_MAX_PAYLOAD {
                break;
            }
        }

        if packets == 1 {
            src.advance(MYSQL_HEADER_LEN);
            let payload = src.split_to(total).freeze();
            return Ok(Some(ProtocolMessage::new(first_sequence, payload)));
        }

        let mut payload = BytesMut::with_capacity(total);
        for _ in 0..packets {
            let len = mysql_payload_len(&src[..]);
            src.advance(MYSQL_HEADER_LEN);
            payload.extend_from_slice(&src.split_to(len));
        }
        Ok(Some(ProtocolMessage::new(first_sequence, payload.freeze())))
    }
}

impl Encoder<ProtocolMessage> for MySqlPacketCodec {
    type Error = ProbeError;

    /// Splits payloads of [`MYSQL_MAX_PAYLOAD`] bytes or more into a chain
    /// with consecutive sequence ids, ending in a short (possibly empty) packet.
    fn encode(&mut self, item: ProtocolMessage, dst: &mut BytesMut) -> Result<()> {
        let len = item.payload.len();
        if len > self.max_frame_size {
            return Err(ProbeError::OversizedFrame(len));
        }

        let count = mysql_packet_count(len);
        dst.reserve(len + count * MYSQL_HEADER_LEN);
        let mut chunks = item.payload.chunks(MYSQL_MAX_PAYLOAD);
        let mut sequence = item.header.opcode;
        for _ in 0..count {
            let chunk = chunks.next().unwrap_or(&[]);
            dst.put_slice(&(chunk.len() as u32).to_le_bytes()[..3]);
            dst.put_u8(sequence);
            dst.put_slice(chunk);
            sequence = sequence.wrapping_add(1);
        }
        Ok(())
    }
}

/// TPKT (RFC 1006) framing used by RDP's X.224 layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TpktCodec;

impl Decoder for TpktCodec {
    type Item = ProtocolMessage;
    type Error = ProbeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ProtocolMessage>> {
        if src.len() < TPKT_HEADER_LEN {
            return Ok(None);
        }

        if src[0] != TPKT_VERSION {
            return Err(ProbeError::Protocol(format!(
                "bad TPKT version {:#04x}",
                src[0]
            )));
        }

        let total = u16::from_be_bytes([src[2], src[3]]) as usize;
        if total < TPKT_HEADER_LEN {
            return Err(ProbeError::Protocol(format!("TPKT length {total} below header size")));
        }

        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let version = src[0];
        src.advance(TPKT_HEADER_LEN);
        let payload = src.split_to(total - TPKT_HEADER_LEN).freeze();
        Ok(Some(ProtocolMessage::new(version, payload)))
    }
}

impl Encoder<ProtocolMessage> for TpktCodec {
    type Error = ProbeError;

    fn encode(&mut self, item: ProtocolMessage, dst: &mut BytesMut) -> Result<()> {
        let total = item.payload.len() + TPKT_HEADER_LEN;
        if total > u16::MAX as usize {
            return Err(ProbeError::OversizedFrame(total));
        }
        dst.reserve(total);
        dst.put_u8(TPKT_VERSION);
        dst.put_u8(0);
        dst.put_u16(total as u16);
        dst.put_slice(&item.payload);
        Ok(())
    }
}
