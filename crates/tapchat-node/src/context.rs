use tapchat_session::SessionHandle;

use crate::config::NodeConfig;
use crate::transcript::Transcript;

/// Everything the chat front end needs, built once in `main`.
pub struct AppContext {
    pub config: NodeConfig,
    pub session: SessionHandle,
    pub transcript: Transcript,
}

impl AppContext {
    pub fn new(config: NodeConfig, session: SessionHandle) -> Self {
        Self {
            config,
            session,
            transcript: Transcript::new(),
        }
    }

    pub fn local_name(&self) -> &str {
        &self.config.node.name
    }
}
