//! Generic frame unit exchanged by sessions.

use bytes::Bytes;
use serde::Serialize;

/// Fixed header fields shared by length-prefixed wire formats.
///
/// `opcode` carries the per-format tag byte: the sequence id for MySQL
/// packets and the TPKT version for RDP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameHeader {
    /// Payload length in bytes (excluding the header)
    pub length: u32,
    pub opcode: u8,
}

/// One decoded frame: header plus owned payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMessage {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl ProtocolMessage {
    pub fn new(opcode: u8, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        Self {
            header: FrameHeader {
                length: payload.len() as u32,
                opcode,
            },
            payload,
        }
    }

    /// First payload byte, the message tag for most formats.
    pub fn tag(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
