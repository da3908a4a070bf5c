//! Connection lifecycle and the requirement levels the precondition gate checks

use std::fmt;

/// Where a connection is in its lifecycle
///
/// Progresses `Connecting -> Authenticated -> InWorld -> Disconnected` and
/// never moves backwards; teardown can jump straight to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Connecting,
    Authenticated,
    InWorld,
    Disconnected,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` respects the lifecycle order
    pub fn can_advance_to(self, next: ConnectionState) -> bool {
        next == ConnectionState::Disconnected || (self != ConnectionState::Disconnected && next > self)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::InWorld => "in-world",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Minimal connection state a message type needs before dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Requirement {
    #[default]
    None,
    Authenticated,
    InWorld,
}

impl Requirement {
    pub fn is_met_by(self, state: ConnectionState) -> bool {
        match state {
            ConnectionState::Disconnected => false,
            ConnectionState::Connecting => self == Requirement::None,
            ConnectionState::Authenticated => self != Requirement::InWorld,
            ConnectionState::InWorld => true,
        }
    }
}
