//! tapchat Protocol -- wire frames, frame codec, framed channel, chat messages.
//!
//! One ordered duplex byte stream per session.
//! 12-byte little-endian header (version, opcode, length) + UTF-8 payload.

pub mod channel;
pub mod chat;
pub mod codec;
pub mod messages;

pub use channel::{FrameReader, FrameWriter, FramedChannel};
pub use chat::{Direction, Message};
pub use codec::FrameCodec;
pub use messages::{Frame, Opcode};

/// The only protocol version spoken on the wire.
pub const PROTOCOL_VERSION: u32 = 0;

/// Header size: version + opcode + length, 4 bytes each.
pub const HEADER_LEN: usize = 12;

/// Maximum payload size accepted or produced: 1 MiB.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u32, got: u32 },
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
    #[error("invalid utf-8 payload: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// True for failures caused by the stream itself rather than by bad frame content.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, ProtocolError::ConnectionClosed | ProtocolError::Io(_))
    }
}
