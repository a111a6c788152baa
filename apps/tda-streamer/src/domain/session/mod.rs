//! Session Lifecycle
//!
//! States of a streaming session and the transitions allowed between them.
//!
//! ```text
//! Disconnected ─► Connecting ─► Authenticating ─► Active ◄─┐
//!                                     │             │      │
//!                                     ▼             ▼      │
//!                                   Closed ◄── Reconnecting ┘
//! ```

use std::fmt;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Not yet opened.
    Disconnected,
    /// Transport handshake in progress.
    Connecting,
    /// Login request sent, awaiting its response.
    Authenticating,
    /// Logged in; subscriptions and data flow.
    Active,
    /// Connection lost; reconnecting and replaying subscriptions.
    Reconnecting,
    /// Terminal. Closed explicitly or after an unrecoverable failure.
    Closed,
}

impl SessionState {
    /// Short lowercase label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Active => "active",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }

    /// Numeric encoding for the state gauge.
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Authenticating => 2.0,
            Self::Active => 3.0,
            Self::Reconnecting => 4.0,
            Self::Closed => 5.0,
        }
    }

    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// During a reconnect cycle the session passes through `Connecting` and
    /// `Authenticating` again, so those are reachable from `Reconnecting`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use SessionState::{Active, Authenticating, Closed, Connecting, Disconnected, Reconnecting};
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting | Reconnecting, Authenticating)
                | (Reconnecting, Connecting)
                | (Authenticating, Active)
                | (Active, Reconnecting)
                | (Connecting | Authenticating | Reconnecting, Reconnecting)
                | (Disconnected | Connecting | Authenticating | Active | Reconnecting, Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(SessionState::Disconnected, SessionState::Connecting, true)]
    #[test_case(SessionState::Connecting, SessionState::Authenticating, true)]
    #[test_case(SessionState::Authenticating, SessionState::Active, true)]
    #[test_case(SessionState::Authenticating, SessionState::Closed, true)]
    #[test_case(SessionState::Active, SessionState::Reconnecting, true)]
    #[test_case(SessionState::Reconnecting, SessionState::Reconnecting, true)]
    #[test_case(SessionState::Reconnecting, SessionState::Connecting, true)]
    #[test_case(SessionState::Connecting, SessionState::Reconnecting, true)]
    #[test_case(SessionState::Disconnected, SessionState::Reconnecting, false)]
    #[test_case(SessionState::Active, SessionState::Closed, true)]
    #[test_case(SessionState::Disconnected, SessionState::Active, false)]
    #[test_case(SessionState::Closed, SessionState::Active, false)]
    #[test_case(SessionState::Closed, SessionState::Closed, false)]
    #[test_case(SessionState::Active, SessionState::Authenticating, false)]
    fn transitions(from: SessionState, to: SessionState, allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn only_closed_is_terminal() {
        assert!(SessionState::Closed.is_terminal());
        assert!(!SessionState::Reconnecting.is_terminal());
    }
}
