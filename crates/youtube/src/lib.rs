//! YouTube live chat connector.
//!
//! Polls `liveChat/messages` for the configured (or currently active) live
//! chat, honoring the server's polling interval, and posts replies through
//! the same API.

pub mod api;
pub mod connector;
pub mod error;

pub use {
    connector::{YOUTUBE_LIMITS, YoutubeConnector},
    error::{Error, Result},
};
