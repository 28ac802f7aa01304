//! Integration test entry point for tapchat-node.
//!
//! Two sessions talk over real loopback sockets through `LanDiscovery`.
//!
//! Run with: cargo test --test integration

mod harness;
mod chat;
mod lifecycle;
