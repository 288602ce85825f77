use std::{collections::VecDeque, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    chatrelay_channels::{
        Connector, ConnectorError, PlatformSender, Result, SendLimits, Session,
    },
    chatrelay_common::{ChatMessage, Platform},
    chatrelay_config::YoutubeConfig,
    chatrelay_oauth::Credential,
    tokio::time::Instant,
    tracing::{debug, info},
};

use crate::{
    api::{MessagePage, YoutubeApi, to_chat_message},
    error::Error,
};

/// Live chat messages are capped at 200 characters.
pub const YOUTUBE_LIMITS: SendLimits = SendLimits::new(200, Duration::from_millis(1500));

/// Follows one live chat through the polling API.
pub struct YoutubeConnector {
    config: YoutubeConfig,
    http: reqwest::Client,
}

impl YoutubeConnector {
    pub fn new(config: YoutubeConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Connector for YoutubeConnector {
    fn platform(&self) -> Platform {
        Platform::Youtube
    }

    fn limits(&self) -> SendLimits {
        YOUTUBE_LIMITS
    }

    async fn connect(&self, credential: Option<Credential>) -> Result<Box<dyn Session>> {
        let credential =
            credential.ok_or_else(|| ConnectorError::config("no youtube credential"))?;
        let api = YoutubeApi::new(
            self.http.clone(),
            &self.config.api_base,
            credential.access_token.clone(),
        );

        let live_chat_id = match &self.config.live_chat_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => api.active_live_chat_id().await?,
        };

        // The first page is history; it only positions the cursor.
        let first = api.messages(&live_chat_id, None).await?;
        let min_interval = Duration::from_millis(self.config.min_poll_interval_ms);
        let mut session = YoutubeSession {
            api: api.clone(),
            live_chat_id: live_chat_id.clone(),
            own_channel_id: credential.account_id.clone(),
            page_token: None,
            interval: min_interval,
            min_interval,
            next_poll: Instant::now(),
            pending: VecDeque::new(),
            sender: Arc::new(YoutubeSender { api, live_chat_id }),
        };
        let skipped = first.items.len();
        session.advance(&first);
        info!(
            live_chat_id = %session.live_chat_id,
            skipped,
            interval_ms = session.interval.as_millis() as u64,
            "youtube live chat connected"
        );
        Ok(Box::new(session))
    }
}

struct YoutubeSession {
    api: YoutubeApi,
    live_chat_id: String,
    /// The bot's own channel; its messages are not relayed back.
    own_channel_id: Option<String>,
    page_token: Option<String>,
    interval: Duration,
    min_interval: Duration,
    next_poll: Instant,
    pending: VecDeque<ChatMessage>,
    sender: Arc<YoutubeSender>,
}

impl YoutubeSession {
    /// Move the cursor past `page` and schedule the next poll.
    fn advance(&mut self, page: &MessagePage) {
        if let Some(token) = &page.next_page_token {
            self.page_token = Some(token.clone());
        }
        self.interval = Duration::from_millis(page.polling_interval_millis).max(self.min_interval);
        self.next_poll = Instant::now() + self.interval;
    }
}

#[async_trait]
impl Session for YoutubeSession {
    fn sender(&self) -> Arc<dyn PlatformSender> {
        Arc::clone(&self.sender) as Arc<dyn PlatformSender>
    }

    async fn recv(&mut self) -> Result<Option<ChatMessage>> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(Some(message));
            }
            tokio::time::sleep_until(self.next_poll).await;

            let page = match self
                .api
                .messages(&self.live_chat_id, self.page_token.as_deref())
                .await
            {
                Ok(page) => page,
                Err(Error::ChatEnded) => {
                    info!(live_chat_id = %self.live_chat_id, "youtube live chat ended");
                    return Ok(None);
                },
                Err(e) => return Err(e.into()),
            };
            self.advance(&page);

            for raw in &page.items {
                match to_chat_message(&self.live_chat_id, raw) {
                    Some(message)
                        if self.own_channel_id.as_deref() == Some(message.user_id.as_str()) =>
                    {
                        debug!("skipping own youtube message");
                    },
                    Some(message) => self.pending.push_back(message),
                    None => debug!("skipping non-text youtube chat item"),
                }
            }
        }
    }

    async fn close(&mut self) {
        self.pending.clear();
    }
}

struct YoutubeSender {
    api: YoutubeApi,
    live_chat_id: String,
}

#[async_trait]
impl PlatformSender for YoutubeSender {
    async fn send(&self, channel: &str, text: &str) -> Result<()> {
        let live_chat_id = if channel.is_empty() {
            self.live_chat_id.as_str()
        } else {
            channel
        };
        self.api
            .send_message(live_chat_id, text)
            .await
            .map_err(ConnectorError::from)
    }
}
