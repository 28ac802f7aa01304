//! tapchat Session -- connection state machine and session task.
//!
//! One session owns at most one peer stream. Discovery is delegated to a
//! host `DiscoveryAdapter`; the session turns its events into state
//! transitions, runs the frame read loop and exposes a cloneable handle.

pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod session;
pub mod state;
pub mod testing;

pub use config::SessionConfig;
pub use discovery::{Capabilities, DiscoveryAdapter, DiscoveryError, DiscoveryEvent, PeerHandle};
pub use error::SessionError;
pub use events::{SessionEvent, SessionSnapshot};
pub use session::{spawn_session, SessionHandle};
pub use state::{SessionState, SessionStatus};
