//! Bridge for the companion browser extension.
//!
//! The extension scrapes chat from sites without a usable API and streams it
//! to a local websocket served here. No OAuth credential is involved; an
//! optional shared token guards the socket.

pub mod connector;
pub mod protocol;

pub use {
    connector::{EXTENSION_LIMITS, ExtensionConnector},
    protocol::{ChatFrame, ClientFrame, ServerFrame},
};
