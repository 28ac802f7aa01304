//! Chat message model shared by the session layer and its callers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

/// One chat line, as shown in a transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub direction: Direction,
    pub sender_name: String,
    pub text: String,
    /// Set by the transcript owner once the session the message belongs to has ended.
    #[serde(default)]
    pub archived: bool,
}

impl Message {
    pub fn incoming(sender_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            direction: Direction::In,
            sender_name: sender_name.into(),
            text: text.into(),
            archived: false,
        }
    }

    pub fn outgoing(sender_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            direction: Direction::Out,
            sender_name: sender_name.into(),
            text: text.into(),
            archived: false,
        }
    }

    pub fn archive(&mut self) {
        self.archived = true;
    }
}
