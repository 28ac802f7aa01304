//! Connection state machine.
//!
//! Pure bookkeeping: which status is live, the learned peer name, the last
//! browse result and the generation of the current stream. The session task
//! performs the side effects this type allows.

use serde::{Deserialize, Serialize};

use crate::discovery::PeerHandle;
use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Searching,
    Connecting,
    Listening,
    Connected,
}

impl SessionStatus {
    pub fn name(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Searching => "searching",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Listening => "listening",
            SessionStatus::Connected => "connected",
        }
    }

    /// Discovery has been started and not yet stopped.
    pub fn is_started(&self) -> bool {
        !matches!(self, SessionStatus::Idle)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifies one adopted stream. Results from older streams are ignored.
pub type Generation = u64;

#[derive(Debug)]
pub struct SessionState {
    status: SessionStatus,
    peer_name: String,
    peers: Vec<PeerHandle>,
    generation: Generation,
    link_open: bool,
    interrupted: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            status: SessionStatus::Idle,
            peer_name: String::new(),
            peers: Vec::new(),
            generation: 0,
            link_open: false,
            interrupted: false,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn peer_name(&self) -> &str {
        &self.peer_name
    }

    pub fn peers(&self) -> &[PeerHandle] {
        &self.peers
    }

    /// The current stream failed and nobody has disconnected yet.
    pub fn is_interrupted(&self) -> bool {
        self.link_open && self.interrupted
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Connected with a stream that has not failed yet.
    pub fn can_send(&self) -> bool {
        self.status == SessionStatus::Connected && self.link_open && !self.interrupted
    }

    /// Idle → Searching.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.status != SessionStatus::Idle {
            return Err(SessionError::InvalidState {
                op: "start",
                status: self.status,
            });
        }
        self.status = SessionStatus::Searching;
        self.peer_name.clear();
        Ok(())
    }

    /// Any → Idle. Returns the status left behind. The browse result goes too.
    pub fn stop(&mut self) -> SessionStatus {
        let from = self.status;
        self.status = SessionStatus::Idle;
        self.peers.clear();
        self.close_link();
        from
    }

    /// Connected → Searching. Returns false (and changes nothing) from any other status.
    pub fn disconnect(&mut self) -> bool {
        if self.status != SessionStatus::Connected {
            return false;
        }
        self.status = SessionStatus::Searching;
        self.close_link();
        true
    }

    /// Operations that need discovery to be running.
    pub fn require_started(&self, op: &'static str) -> Result<(), SessionError> {
        if self.status.is_started() {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                op,
                status: self.status,
            })
        }
    }

    /// Adapter reported a triggered connection is being negotiated.
    pub fn mark_connecting(&mut self) {
        if self.status.is_started() && self.status != SessionStatus::Connected {
            self.status = SessionStatus::Connecting;
        }
    }

    /// Adapter reported it is waiting for the other side.
    pub fn mark_listening(&mut self) {
        if self.status.is_started() && self.status != SessionStatus::Connected {
            self.status = SessionStatus::Listening;
        }
    }

    /// A new stream replaces whatever was there. Returns its generation.
    pub fn adopt_link(&mut self) -> Generation {
        self.generation += 1;
        self.status = SessionStatus::Connected;
        self.peer_name.clear();
        self.link_open = true;
        self.interrupted = false;
        self.generation
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        self.link_open && generation == self.generation
    }

    /// Record the name announced by the current peer. Returns true if it changed.
    pub fn set_peer_name(&mut self, generation: Generation, name: &str) -> bool {
        if !self.is_current(generation) || self.peer_name == name {
            return false;
        }
        self.peer_name = name.to_string();
        true
    }

    /// First failure on the current stream. Returns true only once per stream.
    pub fn mark_interrupted(&mut self, generation: Generation) -> bool {
        if !self.is_current(generation) || self.interrupted {
            return false;
        }
        self.interrupted = true;
        true
    }

    pub fn set_peers(&mut self, peers: Vec<PeerHandle>) {
        self.peers = peers;
    }

    fn close_link(&mut self) {
        self.link_open = false;
        self.interrupted = false;
        self.peer_name.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_start_from_idle() {
        let mut state = SessionState::new();
        state.start().unwrap();
        assert_eq!(state.status(), SessionStatus::Searching);
    }

    #[test]
    fn test_start_twice_is_misuse() {
        let mut state = SessionState::new();
        state.start().unwrap();
        let err = state.start().unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState {
                op: "start",
                status: SessionStatus::Searching
            }
        ));
        assert_eq!(state.status(), SessionStatus::Searching);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut state = SessionState::new();
        assert_eq!(state.stop(), SessionStatus::Idle);
        state.start().unwrap();
        state.adopt_link();
        assert_eq!(state.stop(), SessionStatus::Connected);
        assert_eq!(state.stop(), SessionStatus::Idle);
        assert!(!state.can_send());
    }

    #[test]
    fn test_discovery_substates() {
        let mut state = SessionState::new();

        // Ignored while idle
        state.mark_connecting();
        assert_eq!(state.status(), SessionStatus::Idle);

        state.start().unwrap();
        state.mark_listening();
        assert_eq!(state.status(), SessionStatus::Listening);
        state.mark_connecting();
        assert_eq!(state.status(), SessionStatus::Connecting);
    }

    #[test]
    fn test_disconnect_only_from_connected() {
        let mut state = SessionState::new();
        assert!(!state.disconnect());

        state.start().unwrap();
        assert!(!state.disconnect());
        assert_eq!(state.status(), SessionStatus::Searching);

        let gen = state.adopt_link();
        assert!(state.set_peer_name(gen, "Bob"));
        assert!(state.disconnect());
        assert_eq!(state.status(), SessionStatus::Searching);
        assert_eq!(state.peer_name(), "");
    }

    #[test]
    fn test_require_started() {
        let mut state = SessionState::new();
        assert!(state.require_started("search").is_err());
        state.start().unwrap();
        assert!(state.require_started("search").is_ok());
    }

    #[test]
    fn test_peer_name_ignores_stale_generation() {
        let mut state = SessionState::new();
        state.start().unwrap();
        let first = state.adopt_link();
        let second = state.adopt_link();

        assert!(!state.set_peer_name(first, "Old"));
        assert!(state.set_peer_name(second, "New"));
        assert!(!state.set_peer_name(second, "New"));
        assert_eq!(state.peer_name(), "New");
    }

    #[test]
    fn test_new_link_resets_peer_name() {
        let mut state = SessionState::new();
        state.start().unwrap();
        let gen = state.adopt_link();
        state.set_peer_name(gen, "Bob");

        state.adopt_link();
        assert_eq!(state.peer_name(), "");
    }

    #[test]
    fn test_interrupted_once_per_link() {
        let mut state = SessionState::new();
        state.start().unwrap();
        let gen = state.adopt_link();

        assert!(state.can_send());
        assert!(state.mark_interrupted(gen));
        assert!(!state.mark_interrupted(gen));
        assert!(!state.can_send());
        // Still connected until the caller disconnects
        assert_eq!(state.status(), SessionStatus::Connected);

        let next = state.adopt_link();
        assert!(state.mark_interrupted(next));
    }

    #[test]
    fn test_stop_forgets_browse_result() {
        let mut state = SessionState::new();
        state.start().unwrap();
        state.set_peers(vec![PeerHandle::new("bob-id", "Bob")]);

        state.stop();
        assert!(state.peers().is_empty());
    }

    #[test]
    fn test_interrupted_flag_cleared_by_disconnect() {
        let mut state = SessionState::new();
        state.start().unwrap();
        let gen = state.adopt_link();
        assert!(!state.is_interrupted());

        state.mark_interrupted(gen);
        assert!(state.is_interrupted());
        state.disconnect();
        assert!(!state.is_interrupted());
    }

    #[test]
    fn test_interrupt_after_stop_is_ignored() {
        let mut state = SessionState::new();
        state.start().unwrap();
        let gen = state.adopt_link();
        state.stop();
        assert!(!state.mark_interrupted(gen));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Start,
        Stop,
        Disconnect,
        Listening,
        Connecting,
        Adopt,
        Name(bool),
        Interrupt(bool),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Start),
            Just(Op::Stop),
            Just(Op::Disconnect),
            Just(Op::Listening),
            Just(Op::Connecting),
            Just(Op::Adopt),
            any::<bool>().prop_map(Op::Name),
            any::<bool>().prop_map(Op::Interrupt),
        ]
    }

    proptest! {
        #[test]
        fn prop_state_stays_consistent(ops in proptest::collection::vec(op(), 1..60)) {
            let mut state = SessionState::new();
            let mut interrupts = std::collections::HashMap::new();

            for op in ops {
                // `true` targets the live generation, `false` a stale one
                let target = |live: bool, state: &SessionState| {
                    if live { state.generation() } else { state.generation().wrapping_sub(1) }
                };
                match op {
                    Op::Start => { let _ = state.start(); }
                    Op::Stop => { state.stop(); }
                    Op::Disconnect => { state.disconnect(); }
                    Op::Listening => state.mark_listening(),
                    Op::Connecting => state.mark_connecting(),
                    Op::Adopt => {
                        if state.status().is_started() {
                            state.adopt_link();
                        }
                    }
                    Op::Name(live) => {
                        let gen = target(live, &state);
                        let changed = state.set_peer_name(gen, "peer");
                        prop_assert!(!changed || state.is_current(gen));
                    }
                    Op::Interrupt(live) => {
                        let gen = target(live, &state);
                        if state.mark_interrupted(gen) {
                            *interrupts.entry(gen).or_insert(0) += 1;
                        }
                    }
                }

                prop_assert!(!state.can_send() || state.status() == SessionStatus::Connected);
                if state.status() != SessionStatus::Connected {
                    prop_assert_eq!(state.peer_name(), "");
                }
            }

            prop_assert!(interrupts.values().all(|&n| n == 1));
        }
    }
}
