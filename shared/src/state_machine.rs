//! Connection State Machine
//!
//! Defines the valid lifecycle transitions of the controller's vehicle link.

use std::fmt;

/// Lifecycle state of the managed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    SignalLost,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::SignalLost => "Signal lost",
        };
        f.write_str(name)
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// User asked to connect
    ConnectRequested,
    /// Transport reported the link up
    LinkEstablished,
    /// Transport failed to bring the link up
    ConnectFailed,
    /// Staleness timeout or transport-detected loss
    SignalLost,
    /// Explicit disconnect
    DisconnectRequested,
    /// Teardown after a loss finished
    CleanupComplete,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid; carries the new state
    Success(ConnectionState),
    /// Transition was invalid from current state
    Invalid {
        from: ConnectionState,
        event: LifecycleEvent,
    },
}

/// The connection lifecycle state machine
#[derive(Debug, Default)]
pub struct ConnectionStateMachine {
    current_state: ConnectionState,
}

impl ConnectionStateMachine {
    /// Create a new state machine in Disconnected state
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.current_state
    }

    /// Commands may only be sent while Connected
    pub fn can_send(&self) -> bool {
        self.current_state == ConnectionState::Connected
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: LifecycleEvent) -> TransitionResult {
        match self.get_next_state(event) {
            Some(state) => {
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    fn get_next_state(&self, event: LifecycleEvent) -> Option<ConnectionState> {
        use ConnectionState::*;
        use LifecycleEvent::*;

        match (self.current_state, event) {
            (Disconnected, ConnectRequested) => Some(Connecting),

            (Connecting, LinkEstablished) => Some(Connected),
            (Connecting, ConnectFailed) => Some(Disconnected),

            (Connected, LifecycleEvent::SignalLost) => Some(ConnectionState::SignalLost),

            (ConnectionState::SignalLost, CleanupComplete) => Some(Disconnected),

            // Explicit disconnect is accepted from anywhere, including when
            // already disconnected
            (_, DisconnectRequested) => Some(Disconnected),

            _ => None,
        }
    }
}
