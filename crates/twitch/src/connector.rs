use std::{collections::VecDeque, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    chatrelay_channels::{
        Connector, ConnectorError, PlatformSender, Result, SendLimits, Session,
    },
    chatrelay_common::{ChatMessage, Platform},
    chatrelay_config::TwitchConfig,
    chatrelay_oauth::Credential,
    futures::{
        SinkExt, StreamExt,
        stream::{SplitSink, SplitStream},
    },
    secrecy::ExposeSecret,
    tokio::{net::TcpStream, sync::Mutex},
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async,
        tungstenite::{self, Message},
    },
    tracing::{debug, info, warn},
};

use crate::irc::{IrcMessage, is_auth_failure};

/// Twitch chat limits: 500 characters, one message per 1.5s.
pub const TWITCH_LIMITS: SendLimits = SendLimits::new(500, Duration::from_millis(1500));

/// How long the server gets to welcome us after `NICK`.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Connects to Twitch chat over IRC-over-websocket.
pub struct TwitchConnector {
    config: TwitchConfig,
}

impl TwitchConnector {
    pub fn new(config: TwitchConfig) -> Self {
        Self { config }
    }

    /// Configured channels without `#`, lowercased and deduplicated.
    fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = Vec::new();
        for channel in self.config.channels.iter().map(|c| normalize_channel(c)) {
            if !channel.is_empty() && !channels.contains(&channel) {
                channels.push(channel);
            }
        }
        channels
    }
}

#[async_trait]
impl Connector for TwitchConnector {
    fn platform(&self) -> Platform {
        Platform::Twitch
    }

    fn limits(&self) -> SendLimits {
        TWITCH_LIMITS
    }

    async fn connect(&self, credential: Option<Credential>) -> Result<Box<dyn Session>> {
        let credential =
            credential.ok_or_else(|| ConnectorError::config("no twitch credential"))?;
        let channels = self.channels();
        if channels.is_empty() {
            return Err(ConnectorError::config("no twitch channels configured"));
        }
        let login = self
            .config
            .login
            .clone()
            .or_else(|| credential.login.clone())
            .map(|l| l.to_ascii_lowercase())
            .ok_or_else(|| ConnectorError::config("no twitch login configured"))?;

        debug!(url = %self.config.irc_url, %login, "connecting to twitch chat");
        let (ws, _response) = tokio::time::timeout(HANDSHAKE_TIMEOUT, connect_async(&self.config.irc_url))
            .await
            .map_err(|_| ConnectorError::transient("websocket connect timed out"))?
            .map_err(ws_error)?;
        let (mut sink, mut reader) = ws.split();

        let token = credential.access_token.expose_secret();
        let token = token.strip_prefix("oauth:").unwrap_or(token);
        for line in [
            "CAP REQ :twitch.tv/tags twitch.tv/commands".to_string(),
            format!("PASS oauth:{token}"),
            format!("NICK {login}"),
        ] {
            send_line(&mut sink, &line).await?;
        }

        tokio::time::timeout(HANDSHAKE_TIMEOUT, await_welcome(&mut sink, &mut reader))
            .await
            .map_err(|_| ConnectorError::transient("twitch handshake timed out"))??;

        for channel in &channels {
            send_line(&mut sink, &format!("JOIN #{channel}")).await?;
        }
        info!(%login, channels = ?channels, "twitch chat connected");

        let sink = Arc::new(Mutex::new(sink));
        Ok(Box::new(TwitchSession {
            reader,
            pending: VecDeque::new(),
            ended: None,
            sender: Arc::new(TwitchSender {
                sink: Arc::clone(&sink),
                default_channel: channels[0].clone(),
            }),
            sink,
        }))
    }
}

/// Wait for `001`, answering pings, failing on an auth `NOTICE`.
async fn await_welcome(sink: &mut WsSink, reader: &mut WsReader) -> Result<()> {
    while let Some(frame) = reader.next().await {
        let text = match frame.map_err(ws_error)? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        for msg in text.lines().filter_map(IrcMessage::parse) {
            match msg.command.as_str() {
                "001" => return Ok(()),
                "PING" => send_line(sink, &pong(&msg)).await?,
                "NOTICE" if is_auth_failure(&msg) => {
                    return Err(ConnectorError::auth(
                        msg.trailing().unwrap_or("login authentication failed"),
                    ));
                },
                _ => {},
            }
        }
    }
    Err(ConnectorError::transient(
        "connection closed during handshake",
    ))
}

struct TwitchSession {
    reader: WsReader,
    /// Chat lines already read from a multi-line frame.
    pending: VecDeque<ChatMessage>,
    /// Server-side termination, reported once `pending` is drained.
    ended: Option<ConnectorError>,
    sink: Arc<Mutex<WsSink>>,
    sender: Arc<TwitchSender>,
}

impl TwitchSession {
    /// Handle one frame's lines. A server-side termination stops the frame
    /// and is stashed in `ended`.
    async fn handle_text(&mut self, text: &str) -> Result<()> {
        for msg in text.lines().filter_map(IrcMessage::parse) {
            match msg.command.as_str() {
                "PRIVMSG" => match msg.to_chat_message() {
                    Some(chat) => self.pending.push_back(chat),
                    None => debug!(line = %text, "skipping unusable PRIVMSG"),
                },
                "PING" => {
                    let mut sink = self.sink.lock().await;
                    send_line(&mut sink, &pong(&msg)).await?;
                },
                "RECONNECT" => {
                    self.ended = Some(ConnectorError::transient("server requested reconnect"));
                    break;
                },
                "NOTICE" if is_auth_failure(&msg) => {
                    self.ended = Some(ConnectorError::auth(
                        msg.trailing().unwrap_or("login authentication failed"),
                    ));
                    break;
                },
                _ => {},
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Session for TwitchSession {
    fn sender(&self) -> Arc<dyn PlatformSender> {
        Arc::clone(&self.sender) as Arc<dyn PlatformSender>
    }

    async fn recv(&mut self) -> Result<Option<ChatMessage>> {
        loop {
            if let Some(chat) = self.pending.pop_front() {
                return Ok(Some(chat));
            }
            if let Some(e) = self.ended.take() {
                return Err(e);
            }
            let Some(frame) = self.reader.next().await else {
                return Ok(None);
            };
            match frame.map_err(ws_error)? {
                Message::Text(text) => self.handle_text(text.as_str()).await?,
                Message::Ping(data) => {
                    let _ = self.sink.lock().await.send(Message::Pong(data)).await;
                },
                Message::Close(frame) => {
                    debug!(?frame, "twitch closed the connection");
                    return Ok(None);
                },
                _ => {},
            }
        }
    }

    async fn close(&mut self) {
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.send(Message::Close(None)).await {
            debug!(error = %e, "twitch close frame not sent");
        }
        let _ = sink.close().await;
    }
}

/// Sends `PRIVMSG` lines over the session's websocket.
struct TwitchSender {
    sink: Arc<Mutex<WsSink>>,
    default_channel: String,
}

#[async_trait]
impl PlatformSender for TwitchSender {
    async fn send(&self, channel: &str, text: &str) -> Result<()> {
        let channel = match normalize_channel(channel) {
            c if c.is_empty() => self.default_channel.clone(),
            c => c,
        };
        // IRC lines end at the first newline.
        let text = text.replace(['\r', '\n'], " ");
        let mut sink = self.sink.lock().await;
        send_line(&mut sink, &format!("PRIVMSG #{channel} :{text}"))
            .await
            .inspect_err(|e| warn!(%channel, error = %e, "twitch send failed"))
    }
}

fn normalize_channel(channel: &str) -> String {
    channel.trim().trim_start_matches('#').to_ascii_lowercase()
}

fn pong(ping: &IrcMessage) -> String {
    match ping.trailing() {
        Some(server) => format!("PONG :{server}"),
        None => "PONG".to_string(),
    }
}

async fn send_line(sink: &mut WsSink, line: &str) -> Result<()> {
    sink.send(Message::text(line.to_owned())).await.map_err(ws_error)
}

fn ws_error(e: tungstenite::Error) -> ConnectorError {
    ConnectorError::transient(format!("websocket: {e}"))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_normalization() {
        let connector = TwitchConnector::new(TwitchConfig {
            channels: vec!["#Streamer".into(), "streamer".into(), " ".into(), "Other".into()],
            ..Default::default()
        });
        assert_eq!(connector.channels(), vec!["streamer", "other"]);
    }

    #[test]
    fn pong_echoes_server() {
        let ping = IrcMessage::parse("PING :tmi.twitch.tv").unwrap();
        assert_eq!(pong(&ping), "PONG :tmi.twitch.tv");
    }
}
