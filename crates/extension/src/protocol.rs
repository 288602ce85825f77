//! JSON frames exchanged with the browser extension.

use {
    chatrelay_common::{ChatMessage, Platform},
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

/// Frames the extension sends.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// First frame of every connection.
    Hello {
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        version: Option<String>,
    },
    Chat(ChatFrame),
    Ping,
}

/// A chat line scraped from the page.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatFrame {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_login: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    pub text: String,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Site the line was scraped from.
    #[serde(default)]
    pub source: Option<String>,
}

impl ChatFrame {
    /// The author id falls back to login, then display name.
    pub fn into_chat_message(self) -> Option<ChatMessage> {
        let user_id = self
            .user_id
            .clone()
            .or_else(|| self.user_login.clone())
            .or_else(|| self.display_name.clone())?;
        let mut message = ChatMessage::new(Platform::Extension, user_id, self.text).ok()?;
        if let Some(channel) = self.channel {
            message = message.with_channel(channel);
        }
        if let Some(login) = self.user_login {
            message = message.with_login(login);
        }
        if let Some(name) = self.display_name {
            message = message.with_display_name(name);
        }
        // Pages without stable ids still get one, so consumers can dedupe.
        let id = self
            .message_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        message = message.with_message_id(id);
        if let Some(at) = self.timestamp {
            message = message.with_timestamp(at);
        }
        if let Some(source) = self.source {
            message = message.with_payload(serde_json::json!({ "source": source }));
        }
        Some(message)
    }
}

/// Frames the relay sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Welcome,
    Send { channel: String, text: String },
    Error { message: String },
    Pong,
}

impl ServerFrame {
    pub fn to_json(&self) -> String {
        // Plain enum of strings; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_client_frames() {
        let hello: ClientFrame =
            serde_json::from_str(r#"{"type":"hello","token":"t","version":"1.2"}"#).unwrap();
        assert_eq!(hello, ClientFrame::Hello {
            token: Some("t".into()),
            version: Some("1.2".into()),
        });
        assert_eq!(
            serde_json::from_str::<ClientFrame>(r#"{"type":"ping"}"#).unwrap(),
            ClientFrame::Ping
        );
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"bogus"}"#).is_err());
    }

    #[test]
    fn chat_frame_author_fallbacks() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"type":"chat","display_name":"Kick Viewer","text":"hey","source":"kick.com"}"#,
        )
        .unwrap();
        let ClientFrame::Chat(chat) = frame else {
            panic!("expected chat frame");
        };
        let msg = chat.into_chat_message().unwrap();
        assert_eq!(msg.platform, Platform::Extension);
        assert_eq!(msg.user_id, "Kick Viewer");
        assert_eq!(msg.payload["source"], "kick.com");
        let id = msg.message_id.as_deref().unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());

        let anonymous = ChatFrame {
            channel: None,
            user_id: None,
            user_login: None,
            display_name: None,
            text: "who".into(),
            message_id: None,
            timestamp: None,
            source: None,
        };
        assert!(anonymous.into_chat_message().is_none());
    }

    #[test]
    fn server_frames_serialize_tagged() {
        let frame = ServerFrame::Send {
            channel: "room".into(),
            text: "hi".into(),
        };
        assert_eq!(
            frame.to_json(),
            r#"{"type":"send","channel":"room","text":"hi"}"#
        );
        assert_eq!(ServerFrame::Welcome.to_json(), r#"{"type":"welcome"}"#);
    }
}
