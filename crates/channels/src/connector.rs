use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    chatrelay_common::{ChatMessage, Platform},
    chatrelay_oauth::Credential,
};

use crate::error::Result;

/// Outbound constraints a platform imposes on sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendLimits {
    /// Maximum message length in characters.
    pub max_len: usize,
    /// Minimum pause between two sends.
    pub min_interval: Duration,
}

impl SendLimits {
    pub const fn new(max_len: usize, min_interval: Duration) -> Self {
        Self {
            max_len,
            min_interval,
        }
    }
}

impl Default for SendLimits {
    fn default() -> Self {
        Self::new(500, Duration::from_millis(1500))
    }
}

/// Core connector trait. Each platform implements this.
///
/// A connector owns no long-lived state of its own: every [`Connector::connect`]
/// call makes one attempt and hands back a [`Session`] for the live
/// connection. Retry, refresh and status reporting belong to the supervisor.
#[async_trait]
pub trait Connector: Send + Sync {
    fn platform(&self) -> Platform;

    fn limits(&self) -> SendLimits;

    /// Whether a stored credential is needed to connect.
    fn requires_credential(&self) -> bool {
        true
    }

    /// Open one live connection.
    async fn connect(&self, credential: Option<Credential>) -> Result<Box<dyn Session>>;
}

/// One live connection.
///
/// `recv` must be cancel-safe: the supervisor races it against its
/// cancellation token and drops the future when stopping.
#[async_trait]
pub trait Session: Send {
    /// Handle used by the outbound loop; shares the session's transport.
    fn sender(&self) -> Arc<dyn PlatformSender>;

    /// Next inbound chat message. `Ok(None)` means the platform closed the
    /// connection cleanly.
    async fn recv(&mut self) -> Result<Option<ChatMessage>>;

    /// Graceful transport shutdown.
    async fn close(&mut self);
}

/// Delivers already formatted text to a platform channel.
#[async_trait]
pub trait PlatformSender: Send + Sync {
    async fn send(&self, channel: &str, text: &str) -> Result<()>;
}

/// Builds connectors for platforms from the current configuration.
pub trait ConnectorFactory: Send + Sync {
    fn create(&self, platform: Platform) -> Option<Arc<dyn Connector>>;
}
