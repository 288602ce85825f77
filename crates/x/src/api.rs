//! The slice of the X API v2 the connector uses.

use std::collections::HashMap;

use {
    chatrelay_common::{ChatMessage, Platform},
    chrono::{DateTime, Utc},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, de::DeserializeOwned},
    tracing::{debug, warn},
};

use crate::error::{Error, Result};

/// Largest page the mentions endpoint serves.
const PAGE_SIZE: &str = "100";
/// Pages followed in one poll before the rest is skipped.
const MAX_PAGES: usize = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tweet {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Includes {
    #[serde(default)]
    pub users: Vec<User>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Meta {
    pub newest_id: Option<String>,
    #[serde(default)]
    pub result_count: u64,
    #[serde(default)]
    pub next_token: Option<String>,
}

/// One page of `/2/users/{id}/mentions`, newest first.
#[derive(Debug, Default, Deserialize)]
pub struct Mentions {
    #[serde(default)]
    pub data: Vec<Tweet>,
    #[serde(default)]
    pub includes: Includes,
    #[serde(default)]
    pub meta: Meta,
}

impl Mentions {
    /// Mentions as chat messages, oldest first.
    ///
    /// The channel of each message is the tweet id, so a reply lands in the
    /// same thread.
    pub fn into_chat_messages(self) -> Vec<ChatMessage> {
        let users: HashMap<&str, &User> = self
            .includes
            .users
            .iter()
            .map(|u| (u.id.as_str(), u))
            .collect();
        self.data
            .iter()
            .rev()
            .filter_map(|tweet| {
                let author_id = tweet.author_id.as_deref()?;
                let mut message = ChatMessage::new(Platform::X, author_id, tweet.text.clone())
                    .ok()?
                    .with_channel(tweet.id.clone())
                    .with_message_id(tweet.id.clone())
                    .with_payload(serde_json::json!({ "tweet_id": tweet.id }));
                if let Some(user) = users.get(author_id) {
                    message = message.with_login(user.username.clone());
                    if let Some(name) = &user.name {
                        message = message.with_display_name(name.clone());
                    }
                }
                if let Some(at) = tweet.created_at {
                    message = message.with_timestamp(at);
                }
                Some(message)
            })
            .collect()
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

/// Authenticated client for one account.
#[derive(Clone)]
pub struct XApi {
    http: reqwest::Client,
    base: String,
    token: Secret<String>,
}

impl XApi {
    pub fn new(http: reqwest::Client, base: &str, token: Secret<String>) -> Self {
        Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            token,
        }
    }

    pub async fn me(&self) -> Result<User> {
        let envelope: Envelope<User> = self.get("/2/users/me", &[]).await?;
        envelope
            .data
            .ok_or_else(|| Error::Malformed("users/me without data".into()))
    }

    /// Mentions newer than `since_id`, newest first, following pagination.
    ///
    /// Without `since_id` only the latest few are fetched, to learn where
    /// the timeline stands.
    pub async fn mentions(&self, user_id: &str, since_id: Option<&str>) -> Result<Mentions> {
        let path = format!("/2/users/{user_id}/mentions");
        let fields = [
            ("expansions", "author_id"),
            ("user.fields", "username,name"),
            ("tweet.fields", "created_at,author_id"),
        ];
        let Some(since_id) = since_id else {
            let mut query = fields.to_vec();
            query.push(("max_results", "5"));
            return self.get(&path, &query).await;
        };

        let mut all = Mentions::default();
        let mut next_token: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let page: Mentions = {
                let mut query = fields.to_vec();
                query.push(("since_id", since_id));
                query.push(("max_results", PAGE_SIZE));
                if let Some(token) = &next_token {
                    query.push(("pagination_token", token.as_str()));
                }
                self.get(&path, &query).await?
            };
            // Pages run newest first, so the first one holds the newest id.
            if all.meta.newest_id.is_none() {
                all.meta.newest_id = page.meta.newest_id;
            }
            all.meta.result_count += page.meta.result_count;
            all.data.extend(page.data);
            all.includes.users.extend(page.includes.users);
            next_token = page.meta.next_token;
            if next_token.is_none() {
                break;
            }
        }
        if next_token.is_some() {
            warn!(
                pages = MAX_PAGES,
                "x mention backlog exceeds one poll, older mentions skipped"
            );
        }
        Ok(all)
    }

    /// Post a tweet, as a reply when `in_reply_to` is set.
    pub async fn post_tweet(&self, text: &str, in_reply_to: Option<&str>) -> Result<()> {
        let mut body = serde_json::json!({ "text": text });
        if let Some(id) = in_reply_to {
            body["reply"] = serde_json::json!({ "in_reply_to_tweet_id": id });
        }
        let resp = self
            .http
            .post(format!("{}/2/tweets", self.base))
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
        debug!(path, "x api request");
        let resp = self
            .http
            .get(format!("{}{path}", self.base))
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
    fn mentions_become_oldest_first_messages() {
        let page: Mentions = serde_json::from_value(serde_json::json!({
            "data": [
                {"id": "3", "text": "@bot second", "author_id": "u2"},
                {"id": "2", "text": "@bot first", "author_id": "u1",
                 "created_at": "2024-05-01T12:00:00.000Z"}
            ],
            "includes": {"users": [
                {"id": "u1", "username": "alice", "name": "Alice"},
                {"id": "u2", "username": "bob"}
            ]},
            "meta": {"newest_id": "3", "result_count": 2}
        }))
        .unwrap();
        assert_eq!(page.meta.newest_id.as_deref(), Some("3"));

        let messages = page.into_chat_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "@bot first");
        assert_eq!(messages[0].author(), "Alice");
        assert_eq!(messages[0].user_login.as_deref(), Some("alice"));
        assert_eq!(messages[0].channel.as_deref(), Some("2"));
        assert_eq!(messages[1].author(), "bob");
    }

    #[test]
    fn empty_page_parses() {
        let page: Mentions = serde_json::from_str(r#"{"meta": {"result_count": 0}}"#).unwrap();
        assert!(page.into_chat_messages().is_empty());
    }
}
