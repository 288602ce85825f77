#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    chatrelay_bus::{EventBus, handler_fn},
    chatrelay_channels::{Connector, ConnectorError, PlatformSender, SendLimits, Session},
    chatrelay_common::{ChatMessage, Event, EventKind, Platform, PlatformStatus},
    chatrelay_oauth::Credential,
    tokio::sync::{Notify, mpsc},
};

/// How a [`FakeConnector`] behaves once `connect` is called.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Hand back a session that stays open.
    Open,
    /// Block until [`FakeConnector::release`] is called.
    Gated,
    Panic,
    /// Like `Open`, but closing the session takes three seconds.
    SlowClose,
}

/// Connector that never touches the network and counts its calls.
pub struct FakeConnector {
    platform: Platform,
    mode: Mode,
    gate: Notify,
    connects: AtomicUsize,
    handshakes: AtomicUsize,
}

impl FakeConnector {
    pub fn new(platform: Platform, mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            platform,
            mode,
            gate: Notify::new(),
            connects: AtomicUsize::new(0),
            handshakes: AtomicUsize::new(0),
        })
    }

    /// Calls to `connect`.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Connects that got past the handshake.
    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    pub fn release(&self) {
        self.gate.notify_waiters();
    }
}

#[async_trait]
impl Connector for FakeConnector {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn limits(&self) -> SendLimits {
        SendLimits::new(100, Duration::from_millis(10))
    }

    fn requires_credential(&self) -> bool {
        false
    }

    async fn connect(
        &self,
        _credential: Option<Credential>,
    ) -> Result<Box<dyn Session>, ConnectorError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            Mode::Open | Mode::SlowClose => {},
            Mode::Gated => self.gate.notified().await,
            Mode::Panic => panic!("connector blew up"),
        }
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        let close_delay = if self.mode == Mode::SlowClose {
            Duration::from_secs(3)
        } else {
            Duration::ZERO
        };
        Ok(Box::new(IdleSession { close_delay }))
    }
}

struct IdleSession {
    close_delay: Duration,
}

#[async_trait]
impl Session for IdleSession {
    fn sender(&self) -> Arc<dyn PlatformSender> {
        Arc::new(NullSender)
    }

    async fn recv(&mut self) -> Result<Option<ChatMessage>, ConnectorError> {
        std::future::pending().await
    }

    async fn close(&mut self) {
        tokio::time::sleep(self.close_delay).await;
    }
}

struct NullSender;

#[async_trait]
impl PlatformSender for NullSender {
    async fn send(&self, _channel: &str, _text: &str) -> Result<(), ConnectorError> {
        Ok(())
    }
}

/// Collect every `platform-status` event published on `bus`.
pub fn statuses(bus: &EventBus) -> mpsc::UnboundedReceiver<PlatformStatus> {
    let (tx, rx) = mpsc::unbounded_channel();
    bus.subscribe(
        EventKind::PlatformStatus,
        handler_fn("test-statuses", move |event: Arc<Event>| {
            let tx = tx.clone();
            async move {
                if let Event::PlatformStatus(status) = event.as_ref() {
                    let _ = tx.send(status.clone());
                }
                Ok(())
            }
        }),
    );
    rx
}

pub async fn poll_pause() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Re-evaluate `$cond` (which may `.await`) until it holds or five seconds
/// pass. Evaluates to whether it held.
macro_rules! eventually {
    ($cond:expr) => {
        async {
            for _ in 0..500 {
                if $cond {
                    return true;
                }
                common::poll_pause().await;
            }
            false
        }
        .await
    };
}
