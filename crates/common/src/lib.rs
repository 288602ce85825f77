//! Shared types, error definitions, and event model used across all chatrelay crates.

pub mod error;
pub mod event;
pub mod types;

pub use {
    error::{Error, FromMessage, Result},
    event::{
        ChangeSource, ControlAction, ControlCommand, Event, EventKind, LogRecord, PlatformStatus,
        SettingsChanged, StatusKind,
    },
    types::{ChatMessage, OutboundResponse, Platform},
};
