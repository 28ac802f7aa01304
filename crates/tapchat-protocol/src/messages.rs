//! Wire frame types.
//!
//! Every frame is `version | opcode | length | text`. Two opcodes exist today:
//! a name announcement sent once after connecting, and a chat line.

use crate::PROTOCOL_VERSION;

/// Operation identifier carried in the second header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
    /// Sender's chat name.
    Name = 0,
    /// One chat message.
    Chat = 1,
}

impl Opcode {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Opcode::Name),
            1 => Some(Opcode::Chat),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// A decoded (or to-be-encoded) frame.
///
/// `opcode` is kept raw so frames with operations this build does not know
/// still decode cleanly and can be skipped by the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u32,
    pub opcode: u32,
    pub text: String,
}

impl Frame {
    pub fn new(opcode: Opcode, text: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            opcode: opcode.as_u32(),
            text: text.into(),
        }
    }

    pub fn name(name: impl Into<String>) -> Self {
        Self::new(Opcode::Name, name)
    }

    pub fn chat(text: impl Into<String>) -> Self {
        Self::new(Opcode::Chat, text)
    }

    /// Known operation, or `None` for opcodes this build does not handle.
    pub fn kind(&self) -> Option<Opcode> {
        Opcode::from_u32(self.opcode)
    }

    /// Encoded size on the wire.
    pub fn wire_len(&self) -> usize {
        crate::HEADER_LEN + self.text.len()
    }
}
