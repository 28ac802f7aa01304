//! tapchat Node -- library crate behind the `tapchat` binary.
//!
//! Config loading, the LAN discovery adapter and the console front end live
//! here so integration tests can drive them without the CLI.

pub mod config;
pub mod console;
pub mod context;
pub mod lan_discovery;
pub mod transcript;

use std::path::PathBuf;

pub use context::AppContext;
pub use lan_discovery::{LanConfig, LanDiscovery};
pub use transcript::Transcript;

/// Default config location.
pub const DEFAULT_CONFIG_PATH: &str = "~/.tapchat/config.toml";

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs_or_home() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn dirs_or_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}
