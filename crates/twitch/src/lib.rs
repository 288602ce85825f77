//! Twitch chat connector.
//!
//! Speaks IRC over Twitch's websocket endpoint: authenticates with the
//! stored OAuth token, joins the configured channels and turns tagged
//! `PRIVMSG` lines into [`chatrelay_common::ChatMessage`]s.

pub mod connector;
pub mod irc;

pub use {
    connector::{TWITCH_LIMITS, TwitchConnector},
    irc::IrcMessage,
};
