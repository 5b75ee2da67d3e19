//! # Protocol Session Layer
//!
//! The phase state machine, the session that walks it, and the response
//! decoders that turn frame sequences into structured payloads.
//!
//! ## Components
//! - **Phase**: Lifecycle states and the legal transition table
//! - **Session**: [`HandshakeSession`] owning transport, budget and transcript
//! - **Decoder**: Sentinel-delimited splitting and MySQL result-set decoding
//! - **Transcript**: Ordered log of what was sent, received and decided
//!
//! ## Lifecycle
//! ```text
//! Connecting -> Greeting -> Negotiating -> [Upgrading] -> Authenticating -> Ready
//!      \            \             \              \               \           |
//!       +------------+-------------+--------------+---------------+-> Failed |
//!                                                                      |     |
//!                                                                      v     v
//!                                                                      Closed
//! ```

pub mod decoder;
pub mod phase;
pub mod session;
pub mod transcript;

pub use phase::Phase;
pub use session::{HandshakeSession, PhaseIo};
pub use transcript::{Direction, Transcript, TranscriptEntry};
