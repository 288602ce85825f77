use std::{future::Future, sync::Arc};

use {anyhow::Result, async_trait::async_trait, chatrelay_common::Event};

/// Trait implemented by every bus subscriber.
///
/// Identity is the `Arc` allocation: subscribing the same `Arc` twice for the
/// same kind is a no-op, while two separately allocated handlers with equal
/// names are distinct subscribers.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// A human-readable name for logs.
    fn name(&self) -> &str;

    /// Handle one event. Errors are logged by the bus and never reach the
    /// publisher or other handlers.
    async fn handle(&self, event: Arc<Event>) -> Result<()>;
}

/// Adapter turning an async closure into an [`EventHandler`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: Arc<Event>) -> Result<()> {
        (self.f)(event).await
    }
}

/// Build a shareable handler from an async closure.
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}
