/// Session-level settings, supplied by the host.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name announced to discovery and sent to the peer after connecting.
    pub display_name: String,
    /// Capacity of the event broadcast channel. Slow receivers past this lag.
    pub event_buffer: usize,
    /// Capacity of the command channel between handles and the session task.
    pub command_buffer: usize,
}

impl SessionConfig {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..Self::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            event_buffer: 256,
            command_buffer: 32,
        }
    }
}
