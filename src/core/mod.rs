//! # Core Framing Components
//!
//! Byte accumulation, deadline composition, and the frame formats sessions
//! speak.
//!
//! ## Components
//! - **FrameReader**: Buffered reads over a transport that never drop surplus bytes
//! - **DeadlineBudget**: Per-phase timeouts carved from one overall budget
//! - **ProtocolMessage**: Generic `{header, payload}` frame unit
//! - **Codec**: Tokio codecs for MySQL packets and TPKT
//! - **Lenenc**: Bounds-checked payload cursor and length-encoded fields
//!
//! ## Wire Formats
//! ```text
//! MySQL: [Length(3, LE)] [Sequence(1)] [Payload(N)]
//! TPKT:  [Version(1)=3] [Reserved(1)] [Length(2, BE, incl. header)] [Payload(N)]
//! ```

pub mod codec;
pub mod deadline;
pub mod frame_reader;
pub mod lenenc;
pub mod message;

pub use deadline::DeadlineBudget;
pub use frame_reader::FrameReader;
pub use message::{FrameHeader, ProtocolMessage};
