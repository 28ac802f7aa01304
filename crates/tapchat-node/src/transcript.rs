//! In-memory chat history for the current run.

use tapchat_protocol::Message;

#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Mark every message archived. Called when a conversation ends.
    /// Returns how many changed.
    pub fn archive_all(&mut self) -> usize {
        let mut changed = 0;
        for message in self.messages.iter_mut().filter(|m| !m.archived) {
            message.archive();
            changed += 1;
        }
        changed
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
