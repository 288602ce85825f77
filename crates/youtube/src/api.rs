//! The slice of the YouTube Data API v3 the connector uses.

use {
    chatrelay_common::{ChatMessage, Platform},
    chrono::{DateTime, Utc},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, de::DeserializeOwned},
    tracing::debug,
};

use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastList {
    #[serde(default)]
    pub items: Vec<Broadcast>,
}

#[derive(Debug, Deserialize)]
pub struct Broadcast {
    pub snippet: BroadcastSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastSnippet {
    pub live_chat_id: Option<String>,
}

/// One page of `liveChat/messages`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub next_page_token: Option<String>,
    #[serde(default)]
    pub polling_interval_millis: u64,
    #[serde(default)]
    pub items: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveChatItem {
    id: Option<String>,
    snippet: ItemSnippet,
    author_details: Option<AuthorDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemSnippet {
    published_at: Option<DateTime<Utc>>,
    display_message: Option<String>,
    author_channel_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorDetails {
    channel_id: Option<String>,
    display_name: Option<String>,
}

/// Convert one live-chat item into a chat message.
///
/// Items without an author or visible text (deletions, bans, ...) yield
/// `None`.
pub fn to_chat_message(live_chat_id: &str, raw: &serde_json::Value) -> Option<ChatMessage> {
    let item: LiveChatItem = serde_json::from_value(raw.clone()).ok()?;
    let author = item.author_details.as_ref();
    let user_id = author
        .and_then(|a| a.channel_id.clone())
        .or(item.snippet.author_channel_id)?;
    let text = item.snippet.display_message?;

    let mut message = ChatMessage::new(Platform::Youtube, user_id, text)
        .ok()?
        .with_channel(live_chat_id)
        .with_payload(raw.clone());
    if let Some(name) = author.and_then(|a| a.display_name.clone()) {
        message = message.with_display_name(name);
    }
    if let Some(id) = item.id {
        message = message.with_message_id(id);
    }
    if let Some(at) = item.snippet.published_at {
        message = message.with_timestamp(at);
    }
    Some(message)
}

/// Authenticated client for one account.
#[derive(Clone)]
pub struct YoutubeApi {
    http: reqwest::Client,
    base: String,
    token: Secret<String>,
}

impl YoutubeApi {
    pub fn new(http: reqwest::Client, base: &str, token: Secret<String>) -> Self {
        Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Live chat id of the account's active broadcast.
    pub async fn active_live_chat_id(&self) -> Result<String> {
        let list: BroadcastList = self
            .get("liveBroadcasts", &[
                ("part", "snippet"),
                ("broadcastStatus", "active"),
                ("mine", "true"),
            ])
            .await?;
        list.items
            .into_iter()
            .find_map(|b| b.snippet.live_chat_id)
            .ok_or(Error::NoBroadcast)
    }

    pub async fn messages(&self, live_chat_id: &str, page_token: Option<&str>) -> Result<MessagePage> {
        let mut query = vec![
            ("liveChatId", live_chat_id),
            ("part", "snippet,authorDetails"),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        self.get("liveChat/messages", &query).await
    }

    pub async fn send_message(&self, live_chat_id: &str, text: &str) -> Result<()> {
        let body = serde_json::json!({
            "snippet": {
                "liveChatId": live_chat_id,
                "type": "textMessageEvent",
                "textMessageDetails": { "messageText": text },
            }
        });
        let resp = self
            .http
            .post(format!("{}/liveChat/messages", self.base))
            .query(&[("part", "snippet")])
            .bearer_auth(self.token.expose_secret())
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(Error::from_response(status, &body))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        debug!(path, "youtube api request");
        let resp = self
            .http
            .get(format!("{}/{path}", self.base))
            .query(query)
            .bearer_auth(self.token.expose_secret())
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(Error::from_response(status, &body))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_message_item() {
        let raw = serde_json::json!({
            "id": "msg-1",
            "snippet": {
                "type": "textMessageEvent",
                "publishedAt": "2024-05-01T12:00:00Z",
                "displayMessage": "hello",
                "authorChannelId": "UC123"
            },
            "authorDetails": { "channelId": "UC123", "displayName": "Viewer" }
        });
        let msg = to_chat_message("chat-1", &raw).unwrap();
        assert_eq!(msg.platform, Platform::Youtube);
        assert_eq!(msg.user_id, "UC123");
        assert_eq!(msg.author(), "Viewer");
        assert_eq!(msg.channel.as_deref(), Some("chat-1"));
        assert_eq!(msg.message_id.as_deref(), Some("msg-1"));
        assert_eq!(msg.timestamp.to_rfc3339(), "2024-05-01T12:00:00+00:00");
        assert_eq!(msg.payload["snippet"]["type"], "textMessageEvent");
    }

    #[test]
    fn items_without_text_are_skipped() {
        let raw = serde_json::json!({
            "id": "del-1",
            "snippet": { "type": "messageDeletedEvent", "authorChannelId": "UC1" }
        });
        assert!(to_chat_message("chat-1", &raw).is_none());
    }
}
