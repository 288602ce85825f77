//! Bus event model.
//!
//! [`Event`] is the closed set of things that travel over the bus.
//! [`EventKind`] names each variant and adds grouping ancestors so a handler
//! registered for a broader kind (e.g. [`EventKind::Chat`]) receives every
//! event beneath it.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    Error, Result,
    types::{ChatMessage, OutboundResponse, Platform},
};

// ── EventKind ───────────────────────────────────────────────────────────────

/// Kinds handlers can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Root of the hierarchy; matches every event.
    Any,
    /// Chat traffic in either direction.
    Chat,
    ChatMessageReceived,
    SendResponse,
    /// Platform lifecycle traffic.
    Platform,
    PlatformStatus,
    ControlCommand,
    SettingsChanged,
    Log,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl EventKind {
    /// All variants, for iteration.
    pub const ALL: &'static [EventKind] = &[
        Self::Any,
        Self::Chat,
        Self::ChatMessageReceived,
        Self::SendResponse,
        Self::Platform,
        Self::PlatformStatus,
        Self::ControlCommand,
        Self::SettingsChanged,
        Self::Log,
    ];

    /// Direct ancestor in the kind hierarchy.
    pub fn parent(self) -> Option<EventKind> {
        match self {
            Self::Any => None,
            Self::Chat | Self::Platform | Self::SettingsChanged | Self::Log => Some(Self::Any),
            Self::ChatMessageReceived | Self::SendResponse => Some(Self::Chat),
            Self::PlatformStatus | Self::ControlCommand => Some(Self::Platform),
        }
    }

    /// True when `self` equals `ancestor` or descends from it.
    pub fn is_a(self, ancestor: EventKind) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == ancestor {
                return true;
            }
            current = kind.parent();
        }
        false
    }
}

// ── Payload types ───────────────────────────────────────────────────────────

/// Status values reported on the bus for operator UIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Disabled,
    Connecting,
    Connected,
    Disconnected,
    AuthError,
    Error,
    Stopped,
    Waiting,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::AuthError => "auth_error",
            Self::Error => "error",
            Self::Stopped => "stopped",
            Self::Waiting => "waiting",
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformStatus {
    pub platform: Platform,
    pub status: StatusKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Operator commands routed by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Start,
    Stop,
    Restart,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            other => Err(Error::UnknownCommand {
                name: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub platform: Platform,
    pub command: ControlAction,
}

/// Who wrote a settings change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", content = "platform", rename_all = "snake_case")]
pub enum ChangeSource {
    /// Operator, login flow, config reload.
    #[default]
    External,
    /// A supervisor persisting a refresh or clearing a rejected credential.
    Supervisor(Platform),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsChanged {
    pub keys: Vec<String>,
    #[serde(default)]
    pub source: ChangeSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: String,
    pub target: String,
    pub message: String,
}

// ── Event ───────────────────────────────────────────────────────────────────

/// Everything that travels over the bus. Immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Event {
    ChatMessageReceived(ChatMessage),
    SendResponse(OutboundResponse),
    PlatformStatus(PlatformStatus),
    ControlCommand(ControlCommand),
    SettingsChanged(SettingsChanged),
    Log(LogRecord),
}

impl Event {
    /// Returns the concrete [`EventKind`] of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ChatMessageReceived(_) => EventKind::ChatMessageReceived,
            Self::SendResponse(_) => EventKind::SendResponse,
            Self::PlatformStatus(_) => EventKind::PlatformStatus,
            Self::ControlCommand(_) => EventKind::ControlCommand,
            Self::SettingsChanged(_) => EventKind::SettingsChanged,
            Self::Log(_) => EventKind::Log,
        }
    }

    /// Platform this event concerns, when it concerns exactly one.
    pub fn platform(&self) -> Option<Platform> {
        match self {
            Self::ChatMessageReceived(m) => Some(m.platform),
            Self::SendResponse(r) => Some(r.platform),
            Self::PlatformStatus(s) => Some(s.platform),
            Self::ControlCommand(c) => Some(c.platform),
            Self::SettingsChanged(_) | Self::Log(_) => None,
        }
    }

    pub fn status(platform: Platform, status: StatusKind, message: Option<String>) -> Self {
        Self::PlatformStatus(PlatformStatus {
            platform,
            status,
            message,
        })
    }

    pub fn control(platform: Platform, command: ControlAction) -> Self {
        Self::ControlCommand(ControlCommand { platform, command })
    }

    pub fn settings_changed(keys: Vec<String>, source: ChangeSource) -> Self {
        Self::SettingsChanged(SettingsChanged { keys, source })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_descends_from_any() {
        for kind in EventKind::ALL {
            assert!(kind.is_a(EventKind::Any), "{kind} should be an Any");
        }
    }

    #[test]
    fn grouping_kinds() {
        assert!(EventKind::SendResponse.is_a(EventKind::Chat));
        assert!(EventKind::ChatMessageReceived.is_a(EventKind::Chat));
        assert!(EventKind::ControlCommand.is_a(EventKind::Platform));
        assert!(!EventKind::PlatformStatus.is_a(EventKind::Chat));
        assert!(!EventKind::Chat.is_a(EventKind::ChatMessageReceived));
        assert!(!EventKind::Log.is_a(EventKind::Platform));
    }

    #[test]
    fn event_kind_matches_variant() {
        let ev = Event::control(Platform::X, ControlAction::Restart);
        assert_eq!(ev.kind(), EventKind::ControlCommand);
        assert_eq!(ev.platform(), Some(Platform::X));
        let ev = Event::settings_changed(vec!["x.poll_interval_secs".into()], ChangeSource::External);
        assert_eq!(ev.kind(), EventKind::SettingsChanged);
        assert_eq!(ev.platform(), None);
    }

    #[test]
    fn status_event_serializes_snake_case() {
        let ev = Event::status(Platform::Twitch, StatusKind::AuthError, None);
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["kind"], "platform_status");
        assert_eq!(json["data"]["status"], "auth_error");
        assert_eq!(json["data"]["platform"], "twitch");
    }

    #[test]
    fn control_action_parses() {
        assert_eq!("Restart".parse::<ControlAction>().unwrap(), ControlAction::Restart);
        assert!("reboot".parse::<ControlAction>().is_err());
    }
}
