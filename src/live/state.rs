//! Connection state machine

use serde::Serialize;

/// Externally observable connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// User asked to connect
    Connect,
    /// Remote acknowledged the channel
    RemoteOpen,
    /// Remote closed the channel
    RemoteClose,
    /// Channel failed (including connect failures and timeouts)
    RemoteError,
    /// User asked to disconnect
    Disconnect,
}

impl ConnectionState {
    /// Apply a transition; `None` means the event is a no-op in this state
    #[must_use]
    pub const fn next(self, transition: Transition) -> Option<Self> {
        match (self, transition) {
            (Self::Disconnected, Transition::Connect) => Some(Self::Connecting),
            (Self::Connecting, Transition::RemoteOpen) => Some(Self::Connected),
            (
                Self::Connecting | Self::Connected,
                Transition::RemoteClose | Transition::RemoteError | Transition::Disconnect,
            ) => Some(Self::Disconnected),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}
