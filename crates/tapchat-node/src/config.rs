//! Configuration types for tapchat.
//! Parsed from ~/.tapchat/config.toml.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tapchat_session::SessionConfig;

use crate::lan_discovery::LanConfig;

/// Environment variable that overrides `[node] name`.
pub const NAME_ENV: &str = "TAPCHAT_NAME";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub session: SessionSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    #[serde(default = "default_name")]
    pub name: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            name: default_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySection {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_browse_port")]
    pub browse_port: u16,
    #[serde(default = "default_browse_targets")]
    pub browse_targets: Vec<String>,
    #[serde(default = "default_1500")]
    pub browse_timeout_ms: u64,
    #[serde(default = "default_5000")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub triggered: bool,
    #[serde(default = "default_true")]
    pub browse: bool,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            browse_port: default_browse_port(),
            browse_targets: default_browse_targets(),
            browse_timeout_ms: 1500,
            connect_timeout_ms: 5000,
            triggered: true,
            browse: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_256")]
    pub event_buffer: usize,
    #[serde(default = "default_32")]
    pub command_buffer: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            event_buffer: 256,
            command_buffer: 32,
        }
    }
}

// Default value functions
fn default_name() -> String {
    "tapchat".into()
}
fn default_listen_addr() -> String {
    "0.0.0.0:9475".into()
}
fn default_browse_port() -> u16 {
    9476
}
fn default_browse_targets() -> Vec<String> {
    vec!["255.255.255.255:9476".into()]
}
fn default_1500() -> u64 {
    1500
}
fn default_5000() -> u64 {
    5000
}
fn default_true() -> bool {
    true
}
fn default_256() -> usize {
    256
}
fn default_32() -> usize {
    32
}

impl NodeConfig {
    /// Load config from file, or fall back to defaults if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: NodeConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply `TAPCHAT_NAME` if it is set and non-empty.
    pub fn apply_env(&mut self) {
        if let Ok(name) = std::env::var(NAME_ENV) {
            self.set_name(&name);
        }
    }

    /// Blank names are ignored; the node always has something to announce.
    pub fn set_name(&mut self, name: &str) {
        let name = name.trim();
        if !name.is_empty() {
            self.node.name = name.to_string();
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            display_name: self.node.name.clone(),
            event_buffer: self.session.event_buffer.max(1),
            command_buffer: self.session.command_buffer.max(1),
        }
    }

    pub fn lan_config(&self) -> anyhow::Result<LanConfig> {
        let listen_addr: SocketAddr = self.discovery.listen_addr.parse().map_err(|e| {
            anyhow::anyhow!("invalid listen_addr {:?}: {e}", self.discovery.listen_addr)
        })?;
        let browse_targets = self
            .discovery
            .browse_targets
            .iter()
            .map(|t| {
                t.parse::<SocketAddr>()
                    .map_err(|e| anyhow::anyhow!("invalid browse target {t:?}: {e}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(LanConfig {
            listen_addr,
            browse_addr: SocketAddr::new(listen_addr.ip(), self.discovery.browse_port),
            browse_targets,
            browse_timeout: Duration::from_millis(self.discovery.browse_timeout_ms),
            connect_timeout: Duration::from_millis(self.discovery.connect_timeout_ms),
            triggered: self.discovery.triggered,
            browse: self.discovery.browse,
        })
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node: NodeSection::default(),
            discovery: DiscoverySection::default(),
            session: SessionSection::default(),
        }
    }
}
