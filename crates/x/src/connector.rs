use std::{collections::VecDeque, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    chatrelay_channels::{
        Connector, ConnectorError, PlatformSender, Result, SendLimits, Session,
    },
    chatrelay_common::{ChatMessage, Platform},
    chatrelay_config::XConfig,
    chatrelay_oauth::Credential,
    tracing::{debug, info},
};

use crate::api::{Mentions, XApi};

/// Posts are capped at 280 characters; replies are spaced 5s apart.
pub const X_LIMITS: SendLimits = SendLimits::new(280, Duration::from_secs(5));

/// Polls the account's mentions and answers with threaded replies.
pub struct XConnector {
    config: XConfig,
    http: reqwest::Client,
}

impl XConnector {
    pub fn new(config: XConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.config.poll_interval_secs.max(1))
    }
}

#[async_trait]
impl Connector for XConnector {
    fn platform(&self) -> Platform {
        Platform::X
    }

    fn limits(&self) -> SendLimits {
        X_LIMITS
    }

    async fn connect(&self, credential: Option<Credential>) -> Result<Box<dyn Session>> {
        let credential = credential.ok_or_else(|| ConnectorError::config("no x credential"))?;
        let api = XApi::new(
            self.http.clone(),
            &self.config.api_base,
            credential.access_token.clone(),
        );

        let me = api.me().await?;
        // Mentions that predate the connection are not replayed.
        let primer = api.mentions(&me.id, None).await?;
        info!(
            user = %me.username,
            since_id = ?primer.meta.newest_id,
            "x mention polling connected"
        );

        Ok(Box::new(XSession {
            since_id: primer.meta.newest_id,
            sender: Arc::new(XSender { api: api.clone() }),
            api,
            user_id: me.id,
            interval: self.poll_interval(),
            pending: VecDeque::new(),
        }))
    }
}

struct XSession {
    api: XApi,
    user_id: String,
    since_id: Option<String>,
    interval: Duration,
    pending: VecDeque<ChatMessage>,
    sender: Arc<XSender>,
}

impl XSession {
    fn absorb(&mut self, page: Mentions) {
        if let Some(newest) = &page.meta.newest_id {
            self.since_id = Some(newest.clone());
        }
        let count = page.meta.result_count;
        for message in page.into_chat_messages() {
            if message.user_id == self.user_id {
                continue;
            }
            self.pending.push_back(message);
        }
        debug!(count, queued = self.pending.len(), "x mentions polled");
    }
}

#[async_trait]
impl Session for XSession {
    fn sender(&self) -> Arc<dyn PlatformSender> {
        Arc::clone(&self.sender) as Arc<dyn PlatformSender>
    }

    async fn recv(&mut self) -> Result<Option<ChatMessage>> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(Some(message));
            }
            tokio::time::sleep(self.interval).await;
            let page = self
                .api
                .mentions(&self.user_id, self.since_id.as_deref())
                .await?;
            self.absorb(page);
        }
    }

    async fn close(&mut self) {
        self.pending.clear();
    }
}

struct XSender {
    api: XApi,
}

#[async_trait]
impl PlatformSender for XSender {
    /// `channel` is the tweet being answered; empty posts a standalone tweet.
    async fn send(&self, channel: &str, text: &str) -> Result<()> {
        let reply_to = (!channel.is_empty()).then_some(channel);
        self.api
            .post_tweet(text, reply_to)
            .await
            .map_err(ConnectorError::from)
    }
}
