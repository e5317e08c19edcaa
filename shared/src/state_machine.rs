//! Connectivity State Machine
//!
//! Defines the valid transitions between the bridge's connectivity states.
//! Timers and collaborators live with the supervisor that drives it; this
//! type only decides what an event means in the current state.

use std::fmt;

use crate::timing;

/// Connectivity state of the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Datagram transport usable, traffic flows
    Connected,
    /// Transport lost, re-establishing it; no traffic is sent
    Reconnecting,
    /// Link not restored in time; local access point offered while retrying
    AccessPointFallback,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Connected => write!(f, "Connected"),
            LinkState::Reconnecting => write!(f, "Reconnecting"),
            LinkState::AccessPointFallback => write!(f, "AccessPointFallback"),
        }
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// A fan-out reached no target at all
    AllTargetsFailed,
    /// The link layer itself reported down
    LinkLost,
    /// Link up and transport re-established
    TransportRestored,
    /// The link stayed down for the whole reconnect window
    LinkWindowExpired,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// State changed
    Success { from: LinkState, to: LinkState },
    /// Event accepted, state unchanged
    Unchanged(LinkState),
    /// Event makes no sense in the current state
    Invalid { from: LinkState, event: LinkEvent },
}

/// The connectivity state machine
#[derive(Debug)]
pub struct LinkStateMachine {
    current_state: LinkState,
    /// Millisecond timestamp at which the current failure episode began
    episode_started_ms: u32,
    /// Number of Connected -> Reconnecting transitions so far
    episodes: u64,
}

impl Default for LinkStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkStateMachine {
    /// Create a new state machine in Connected state
    pub fn new() -> Self {
        Self {
            current_state: LinkState::Connected,
            episode_started_ms: 0,
            episodes: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.current_state
    }

    pub fn episodes(&self) -> u64 {
        self.episodes
    }

    pub fn episode_started_ms(&self) -> u32 {
        self.episode_started_ms
    }

    /// Whether the current failure episode has lasted at least `window_ms`
    pub fn episode_exceeds(&self, now_ms: u32, window_ms: u32) -> bool {
        self.current_state != LinkState::Connected
            && timing::is_due(now_ms, self.episode_started_ms, window_ms)
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: LinkEvent, now_ms: u32) -> TransitionResult {
        use LinkEvent::*;
        use LinkState::*;

        let from = self.current_state;
        let to = match (from, event) {
            // A failure episode starts exactly once
            (Connected, AllTargetsFailed | LinkLost) => {
                self.episode_started_ms = now_ms;
                self.episodes = self.episodes.saturating_add(1);
                Reconnecting
            }
            (Reconnecting | AccessPointFallback, AllTargetsFailed | LinkLost) => {
                return TransitionResult::Unchanged(from);
            }

            (Reconnecting | AccessPointFallback, TransportRestored) => Connected,
            (Connected, TransportRestored) => return TransitionResult::Unchanged(from),

            (Reconnecting, LinkWindowExpired) => AccessPointFallback,
            (AccessPointFallback, LinkWindowExpired) => return TransitionResult::Unchanged(from),
            (Connected, LinkWindowExpired) => return TransitionResult::Invalid { from, event },
        };

        self.current_state = to;
        TransitionResult::Success { from, to }
    }
}

/// Check if a transition from one state to another is generally valid
pub fn is_valid_transition(from: LinkState, to: LinkState) -> bool {
    use LinkState::*;

    match (from, to) {
        (a, b) if a == b => true,
        (Connected, Reconnecting) => true,
        (Reconnecting, Connected) => true,
        (Reconnecting, AccessPointFallback) => true,
        (AccessPointFallback, Connected) => true,
        _ => false,
    }
}
