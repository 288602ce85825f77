use std::fmt;

use chatrelay_common::StatusKind;

/// In-memory lifecycle state of one platform supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupervisorState {
    /// No usable credential or configuration; parked.
    Disabled,
    Connecting,
    Connected,
    /// Transport lost; a retry may follow.
    Disconnected,
    /// Credential rejected and cleared; parked.
    AuthError,
    Stopped,
}

impl SupervisorState {
    pub fn status(self) -> StatusKind {
        match self {
            Self::Disabled => StatusKind::Disabled,
            Self::Connecting => StatusKind::Connecting,
            Self::Connected => StatusKind::Connected,
            Self::Disconnected => StatusKind::Disconnected,
            Self::AuthError => StatusKind::AuthError,
            Self::Stopped => StatusKind::Stopped,
        }
    }

    /// States the supervisor sits in until it is stopped or restarted.
    pub fn is_parked(self) -> bool {
        matches!(self, Self::Disabled | Self::AuthError)
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.status().as_str())
    }
}
