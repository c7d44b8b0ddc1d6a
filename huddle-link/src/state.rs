//! Connection state machine.
//!
//! ```text
//!                 connect
//!   Idle ────────────────────► Connecting ──opened──► Open
//!                                 ▲   │                 │
//!                           retry │   │ dropped         │ dropped
//!                                 │   ▼                 │
//!                              Reconnecting ◄───────────┘
//!
//!   any ──disconnect──► Disconnected ──connect──► Connecting
//! ```

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never asked to connect.
    Idle,
    /// An open attempt is in flight.
    Connecting,
    /// Handshake sent; frames flow.
    Open,
    /// Transport lost; a retry is scheduled.
    Reconnecting,
    /// The caller no longer wants a connection.
    Disconnected,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Caller asked for a (new) session.
    Connect,
    /// A scheduled or forced reopen started.
    Retry,
    /// Transport opened and handshake sent.
    Opened,
    /// Transport closed or failed to open while reconnection is desired.
    Dropped,
    /// Caller gave up on the connection.
    Disconnect,
}

impl ConnectionState {
    /// The transition table. `None` means the input is invalid in this state.
    pub fn on(self, transition: Transition) -> Option<ConnectionState> {
        use ConnectionState::*;
        use Transition::*;

        match (self, transition) {
            (_, Connect) => Some(Connecting),
            (_, Disconnect) => Some(Disconnected),
            (Reconnecting, Retry) | (Connecting, Retry) => Some(Connecting),
            (Connecting, Opened) => Some(Open),
            (Connecting, Dropped) | (Open, Dropped) | (Reconnecting, Dropped) => Some(Reconnecting),
            _ => None,
        }
    }

    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}
