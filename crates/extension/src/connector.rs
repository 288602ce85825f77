use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    chatrelay_channels::{
        Connector, ConnectorError, PlatformSender, Result, SendLimits, Session,
    },
    chatrelay_common::{ChatMessage, Platform},
    chatrelay_config::ExtensionConfig,
    chatrelay_oauth::Credential,
    futures::{
        SinkExt, StreamExt,
        stream::{FuturesUnordered, SplitSink, SplitStream},
    },
    secrecy::ExposeSecret,
    tokio::{
        net::{TcpListener, TcpStream},
        sync::Mutex,
    },
    tokio_tungstenite::{
        WebSocketStream, accept_async,
        tungstenite::{self, Message},
    },
    tracing::{debug, info, warn},
};

use crate::protocol::{ClientFrame, ServerFrame};

pub const EXTENSION_LIMITS: SendLimits = SendLimits::new(500, Duration::from_millis(1500));

/// How long a freshly connected client has to say hello.
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<TcpStream>;
type WsSink = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Local websocket endpoint the browser extension connects to.
///
/// `connect` listens until one client completes the hello exchange; clients
/// with a wrong token are turned away and listening continues. Pending
/// exchanges are dropped once one succeeds.
pub struct ExtensionConnector {
    config: ExtensionConfig,
}

impl ExtensionConnector {
    pub fn new(config: ExtensionConfig) -> Self {
        Self { config }
    }

    /// Run the hello exchange on an accepted socket.
    async fn handshake(&self, stream: TcpStream, peer: SocketAddr) -> Option<WsStream> {
        let mut ws = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                debug!(%peer, error = %e, "websocket upgrade failed");
                return None;
            },
        };

        let hello = tokio::time::timeout(HELLO_TIMEOUT, next_frame(&mut ws)).await;
        let token = match hello {
            Ok(Some(ClientFrame::Hello { token, version })) => {
                debug!(%peer, ?version, "extension hello");
                token
            },
            Ok(_) => {
                reject(&mut ws, "expected hello").await;
                return None;
            },
            Err(_) => {
                reject(&mut ws, "hello timed out").await;
                return None;
            },
        };

        if let Some(expected) = &self.config.token
            && token.as_deref() != Some(expected.expose_secret().as_str())
        {
            warn!(%peer, "extension presented a wrong token");
            reject(&mut ws, "unauthorized").await;
            return None;
        }

        if let Err(e) = ws.send(Message::text(ServerFrame::Welcome.to_json())).await {
            debug!(%peer, error = %e, "welcome not delivered");
            return None;
        }
        Some(ws)
    }
}

#[async_trait]
impl Connector for ExtensionConnector {
    fn platform(&self) -> Platform {
        Platform::Extension
    }

    fn limits(&self) -> SendLimits {
        EXTENSION_LIMITS
    }

    fn requires_credential(&self) -> bool {
        false
    }

    async fn connect(&self, _credential: Option<Credential>) -> Result<Box<dyn Session>> {
        let addr: SocketAddr = self.config.bind.parse().map_err(|e| {
            ConnectorError::config(format!("invalid extension bind {:?}: {e}", self.config.bind))
        })?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ConnectorError::transient(format!("bind {addr}: {e}")))?;
        info!(%addr, "waiting for browser extension");

        // Hello exchanges run side by side; a silent client never holds up
        // the next one.
        let mut handshakes = FuturesUnordered::new();
        loop {
            let (peer, ws) = tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted
                        .map_err(|e| ConnectorError::transient(format!("accept: {e}")))?;
                    handshakes.push(async move { (peer, self.handshake(stream, peer).await) });
                    continue;
                },
                Some((peer, ws)) = handshakes.next(), if !handshakes.is_empty() => (peer, ws),
            };
            let Some(ws) = ws else {
                continue;
            };
            info!(%peer, "browser extension connected");

            let (sink, reader) = ws.split();
            let sink = Arc::new(Mutex::new(sink));
            return Ok(Box::new(ExtensionSession {
                reader,
                sender: Arc::new(ExtensionSender {
                    sink: Arc::clone(&sink),
                }),
                sink,
            }));
        }
    }
}

/// Next parseable client frame; `None` when the socket ends first.
async fn next_frame(ws: &mut WsStream) -> Option<ClientFrame> {
    while let Some(Ok(message)) = ws.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str(text.as_str()) {
                Ok(frame) => return Some(frame),
                Err(e) => debug!(error = %e, "ignoring malformed extension frame"),
            },
            Message::Close(_) => return None,
            _ => {},
        }
    }
    None
}

async fn reject(ws: &mut WsStream, reason: &str) {
    let frame = ServerFrame::Error {
        message: reason.to_string(),
    };
    let _ = ws.send(Message::text(frame.to_json())).await;
    let _ = ws.close(None).await;
}

struct ExtensionSession {
    reader: WsReader,
    sink: Arc<Mutex<WsSink>>,
    sender: Arc<ExtensionSender>,
}

#[async_trait]
impl Session for ExtensionSession {
    fn sender(&self) -> Arc<dyn PlatformSender> {
        Arc::clone(&self.sender) as Arc<dyn PlatformSender>
    }

    async fn recv(&mut self) -> Result<Option<ChatMessage>> {
        while let Some(message) = self.reader.next().await {
            let text = match message.map_err(ws_error)? {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            match serde_json::from_str::<ClientFrame>(text.as_str()) {
                Ok(ClientFrame::Chat(frame)) => match frame.into_chat_message() {
                    Some(message) => return Ok(Some(message)),
                    None => debug!("dropping extension chat frame without author or text"),
                },
                Ok(ClientFrame::Ping) => {
                    let pong = Message::text(ServerFrame::Pong.to_json());
                    self.sink.lock().await.send(pong).await.map_err(ws_error)?;
                },
                Ok(ClientFrame::Hello { .. }) => debug!("ignoring repeated hello"),
                Err(e) => debug!(error = %e, "ignoring malformed extension frame"),
            }
        }
        info!("browser extension disconnected");
        Ok(None)
    }

    async fn close(&mut self) {
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    }
}

struct ExtensionSender {
    sink: Arc<Mutex<WsSink>>,
}

#[async_trait]
impl PlatformSender for ExtensionSender {
    async fn send(&self, channel: &str, text: &str) -> Result<()> {
        let frame = ServerFrame::Send {
            channel: channel.to_string(),
            text: text.to_string(),
        };
        self.sink
            .lock()
            .await
            .send(Message::text(frame.to_json()))
            .await
            .map_err(ws_error)
    }
}

fn ws_error(e: tungstenite::Error) -> ConnectorError {
    ConnectorError::transient(format!("websocket: {e}"))
}
