//! Connection State Machine
//!
//! `Connecting -> Connected -> Closed`. Datagram connections pass through
//! `Connecting` synchronously while being opened; byte-stream connections may
//! stay there until their handshake completes. `Closed` is terminal.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Connected,
    Closed,
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnState::Connecting => write!(f, "CONNECTING"),
            ConnState::Connected => write!(f, "CONNECTED"),
            ConnState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnEvent {
    /// Transport reports the connection as usable
    ConnectComplete,
    /// Transport gave up on the connection attempt
    ConnectFailed,
    /// Owner closed the connection
    Close,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// State changed
    Changed { from: ConnState, to: ConnState },
    /// Event was valid but had no effect
    Unchanged(ConnState),
    /// Event is not valid from the current state
    Invalid { from: ConnState, event: ConnEvent },
}

#[derive(Debug)]
pub struct ConnStateMachine {
    current_state: ConnState,
}

impl Default for ConnStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnStateMachine {
    /// Create a new state machine in `Connecting`
    pub fn new() -> Self {
        Self {
            current_state: ConnState::Connecting,
        }
    }

    pub fn state(&self) -> ConnState {
        self.current_state
    }

    pub fn is_closed(&self) -> bool {
        self.current_state == ConnState::Closed
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: ConnEvent) -> Transition {
        use ConnEvent::*;
        use ConnState::*;

        let from = self.current_state;
        let to = match (from, event) {
            (Connecting, ConnectComplete) => Connected,
            (Connecting, ConnectFailed) => Closed,
            (Connecting | Connected, Close) => Closed,
            (Connected, ConnectComplete) | (Closed, Close) => {
                return Transition::Unchanged(from);
            }
            _ => return Transition::Invalid { from, event },
        };

        self.current_state = to;
        Transition::Changed { from, to }
    }
}
