use std::{fmt, str::FromStr};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use crate::{Error, Result};

// ── Platform ────────────────────────────────────────────────────────────────

/// External chat services the relay can supervise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// IRC-over-websocket live chat.
    Twitch,
    /// Polling live-chat API.
    Youtube,
    /// Mention-polling API.
    X,
    /// Local websocket bridge fed by the browser extension.
    Extension,
}

impl Platform {
    /// All variants, for iteration.
    pub const ALL: &'static [Platform] = &[Self::Twitch, Self::Youtube, Self::X, Self::Extension];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Twitch => "twitch",
            Self::Youtube => "youtube",
            Self::X => "x",
            Self::Extension => "extension",
        }
    }

    /// Settings key under which this platform's credential is stored.
    pub fn credential_key(&self) -> String {
        format!("credentials.{}", self.as_str())
    }

    /// Whether a changed settings key affects this platform.
    ///
    /// Matches the credential key and every `<platform>.*` config key.
    pub fn is_relevant_key(&self, key: &str) -> bool {
        if key == self.credential_key() || key == self.as_str() {
            return true;
        }
        key.strip_prefix(self.as_str())
            .is_some_and(|rest| rest.starts_with('.'))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "twitch" => Ok(Self::Twitch),
            "youtube" => Ok(Self::Youtube),
            "x" | "twitter" => Ok(Self::X),
            "extension" => Ok(Self::Extension),
            other => Err(Error::UnknownPlatform {
                name: other.to_string(),
            }),
        }
    }
}

// ── ChatMessage ─────────────────────────────────────────────────────────────

/// A chat message received from any platform, in generic form.
///
/// Platform, user id and text are always present; [`ChatMessage::new`]
/// rejects empty values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub platform: Platform,
    /// Channel or room the message was posted in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_login: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Opaque platform-native data (tags, snippets, raw frames).
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl ChatMessage {
    pub fn new(
        platform: Platform,
        user_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<Self> {
        let user_id = user_id.into();
        let text = text.into();
        if user_id.trim().is_empty() {
            return Err(Error::invalid("user_id", "must not be empty"));
        }
        if text.is_empty() {
            return Err(Error::invalid("text", "must not be empty"));
        }
        Ok(Self {
            platform,
            channel: None,
            user_id,
            user_login: None,
            display_name: None,
            text,
            timestamp: Utc::now(),
            message_id: None,
            payload: Value::Null,
        })
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_login(mut self, login: impl Into<String>) -> Self {
        self.user_login = Some(login.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Best human-readable name for the author.
    pub fn author(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.user_login.as_deref())
            .unwrap_or(&self.user_id)
    }
}

// ── OutboundResponse ────────────────────────────────────────────────────────

/// A response to deliver to a platform channel.
///
/// Length and formatting rules are applied by the connector's sender, never
/// by the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundResponse {
    pub platform: Platform,
    pub channel: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl OutboundResponse {
    pub fn new(platform: Platform, channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            platform,
            channel: channel.into(),
            text: text.into(),
            reply_to: None,
        }
    }

    pub fn replying_to(mut self, user: impl Into<String>) -> Self {
        self.reply_to = Some(user.into());
        self
    }

    /// Reply to a received message in the same channel.
    pub fn reply(message: &ChatMessage, text: impl Into<String>) -> Self {
        Self {
            platform: message.platform,
            channel: message.channel.clone().unwrap_or_default(),
            text: text.into(),
            reply_to: Some(
                message
                    .user_login
                    .clone()
                    .unwrap_or_else(|| message.author().to_string()),
            ),
        }
    }
}
