use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex, RwLock, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use {
    chatrelay_common::{Event, EventKind},
    futures::FutureExt,
    tokio::{
        sync::mpsc::{self, error::TrySendError},
        task::JoinHandle,
    },
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use chatrelay_metrics::{bus as bus_metrics, counter, histogram, labels};

use crate::{
    handler::EventHandler,
    stats::{BusStats, BusStatsSnapshot},
};

/// Queue capacity used when the configuration does not override it.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

enum Envelope {
    Event(Arc<Event>),
    /// Wakes an idle worker during shutdown.
    Shutdown,
}

type Registry = HashMap<EventKind, Vec<Arc<dyn EventHandler>>>;

/// State shared between the bus handles and the worker task.
struct Shared {
    registry: RwLock<Registry>,
    stats: BusStats,
}

struct Inner {
    shared: Arc<Shared>,
    tx: mpsc::Sender<Envelope>,
    capacity: usize,
    closed: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to an in-process event bus. Cheap to clone; all clones share the
/// same queue, registry and worker.
///
/// Lifecycle: [`EventBus::new`] spawns the worker on the current tokio
/// runtime; [`EventBus::shutdown`] stops it. Dropping every handle without
/// calling `shutdown` closes the queue and lets the worker drain and exit.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    /// Create a bus with a bounded queue and spawn its worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let shared = Arc::new(Shared {
            registry: RwLock::new(HashMap::new()),
            stats: BusStats::default(),
        });
        let worker = tokio::spawn(run_worker(rx, Arc::clone(&shared)));
        info!(capacity, "event bus started");
        Self {
            inner: Arc::new(Inner {
                shared,
                tx,
                capacity,
                closed: AtomicBool::new(false),
                worker: Mutex::new(Some(worker)),
            }),
        }
    }

    /// Register `handler` for `kind` and every kind beneath it.
    ///
    /// Returns `false` (with a warning) when the identical handler is already
    /// registered for `kind`, or when the bus has been shut down.
    pub fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) -> bool {
        if self.is_closed() {
            warn!(handler = handler.name(), %kind, "bus is shut down, subscription rejected");
            return false;
        }
        let mut registry = self
            .inner
            .shared
            .registry
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let handlers = registry.entry(kind).or_default();
        if handlers.iter().any(|h| same_handler(h, &handler)) {
            warn!(handler = handler.name(), %kind, "handler already subscribed, ignoring");
            return false;
        }
        debug!(handler = handler.name(), %kind, "handler subscribed");
        handlers.push(handler);
        true
    }

    /// Like [`EventBus::subscribe`], but the returned guard unsubscribes when
    /// dropped.
    pub fn subscribe_scoped(&self, kind: EventKind, handler: Arc<dyn EventHandler>) -> Subscription {
        let active = self.subscribe(kind, Arc::clone(&handler));
        Subscription {
            shared: Arc::downgrade(&self.inner.shared),
            kind,
            handler,
            active,
        }
    }

    /// Remove `handler` from `kind`. Unknown handlers are logged and ignored.
    pub fn unsubscribe(&self, kind: EventKind, handler: &Arc<dyn EventHandler>) -> bool {
        remove_handler(&self.inner.shared, kind, handler)
    }

    /// Enqueue `event` for dispatch without waiting.
    ///
    /// Returns `false` when the event was dropped because the queue is full
    /// or the bus is shut down.
    pub fn publish(&self, event: Event) -> bool {
        let stats = &self.inner.shared.stats;
        let kind = event.kind();
        if self.is_closed() {
            stats.dropped.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "metrics")]
            counter!(bus_metrics::EVENTS_DROPPED_TOTAL, labels::KIND => kind.to_string())
                .increment(1);
            warn!(%kind, "bus is shut down, event dropped");
            return false;
        }

        match self.inner.tx.try_send(Envelope::Event(Arc::new(event))) {
            Ok(()) => {
                stats.published.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "metrics")]
                counter!(bus_metrics::EVENTS_PUBLISHED_TOTAL, labels::KIND => kind.to_string())
                    .increment(1);
                true
            },
            Err(err) => {
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "metrics")]
                counter!(bus_metrics::EVENTS_DROPPED_TOTAL, labels::KIND => kind.to_string())
                    .increment(1);
                match err {
                    TrySendError::Full(_) => {
                        error!(%kind, capacity = self.inner.capacity, "event queue full, event dropped");
                    },
                    TrySendError::Closed(_) => {
                        warn!(%kind, "event queue closed, event dropped");
                    },
                }
                false
            },
        }
    }

    /// Number of handlers registered directly under `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.inner
            .shared
            .registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .map_or(0, Vec::len)
    }

    pub fn stats(&self) -> BusStatsSnapshot {
        let queued = self.inner.capacity - self.inner.tx.capacity();
        self.inner
            .shared
            .stats
            .snapshot(queued, self.inner.capacity)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stop the bus.
    ///
    /// New subscriptions and publishes are rejected from here on. A sentinel
    /// is queued behind pending events so an idle worker wakes and exits; if
    /// the worker has not finished within `timeout` it is aborted.
    pub async fn shutdown(&self, timeout: Duration) {
        self.inner.closed.store(true, Ordering::Release);

        let handle = {
            let mut worker = self.inner.worker.lock().unwrap_or_else(|e| e.into_inner());
            worker.take()
        };
        let Some(mut handle) = handle else {
            debug!("event bus already shut down");
            return;
        };

        if self.inner.tx.try_send(Envelope::Shutdown).is_err() {
            debug!("shutdown sentinel not queued, worker is busy");
        }

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => info!("event bus stopped"),
            Ok(Err(e)) => warn!(error = %e, "event bus worker ended abnormally"),
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "event bus worker did not stop in time, aborting");
                handle.abort();
                let _ = handle.await;
            },
        }
    }
}

/// Unsubscribes its handler when dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    shared: Weak<Shared>,
    kind: EventKind,
    handler: Arc<dyn EventHandler>,
    active: bool,
}

impl Subscription {
    /// False when the subscribe call was rejected (duplicate or shut down);
    /// an inactive guard never removes anything.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.active
            && let Some(shared) = self.shared.upgrade()
        {
            remove_handler(&shared, self.kind, &self.handler);
        }
    }
}

fn same_handler(a: &Arc<dyn EventHandler>, b: &Arc<dyn EventHandler>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn remove_handler(shared: &Shared, kind: EventKind, handler: &Arc<dyn EventHandler>) -> bool {
    let mut registry = shared.registry.write().unwrap_or_else(|e| e.into_inner());
    let Some(handlers) = registry.get_mut(&kind) else {
        warn!(handler = handler.name(), %kind, "unsubscribe: handler not registered");
        return false;
    };
    let before = handlers.len();
    handlers.retain(|h| !same_handler(h, handler));
    let removed = handlers.len() != before;
    if handlers.is_empty() {
        registry.remove(&kind);
    }
    if removed {
        debug!(handler = handler.name(), %kind, "handler unsubscribed");
    } else {
        warn!(handler = handler.name(), %kind, "unsubscribe: handler not registered");
    }
    removed
}

/// Handlers whose subscribed kind matches `kind`, in hierarchy order
/// (root first) and registration order within a kind.
fn matching_handlers(shared: &Shared, kind: EventKind) -> Vec<Arc<dyn EventHandler>> {
    let registry = shared.registry.read().unwrap_or_else(|e| e.into_inner());
    EventKind::ALL
        .iter()
        .filter(|k| kind.is_a(**k))
        .filter_map(|k| registry.get(k))
        .flatten()
        .cloned()
        .collect()
}

async fn run_worker(mut rx: mpsc::Receiver<Envelope>, shared: Arc<Shared>) {
    debug!("event bus worker started");
    while let Some(envelope) = rx.recv().await {
        match envelope {
            Envelope::Event(event) => dispatch(&shared, event).await,
            Envelope::Shutdown => break,
        }
    }
    debug!("event bus worker stopped");
}

/// Invoke every matching handler concurrently and wait for all of them.
/// Errors and panics are logged per handler.
async fn dispatch(shared: &Shared, event: Arc<Event>) {
    let kind = event.kind();
    let handlers = matching_handlers(shared, kind);
    shared.stats.dispatched.fetch_add(1, Ordering::Relaxed);
    if handlers.is_empty() {
        return;
    }

    let start = Instant::now();
    let futures = handlers.into_iter().map(|handler| {
        let event = Arc::clone(&event);
        async move {
            let result = AssertUnwindSafe(handler.handle(event)).catch_unwind().await;
            (handler, result)
        }
    });

    for (handler, result) in futures::future::join_all(futures).await {
        match result {
            Ok(Ok(())) => {},
            Ok(Err(e)) => {
                shared.stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "metrics")]
                counter!(bus_metrics::HANDLER_FAILURES_TOTAL, labels::KIND => kind.to_string())
                    .increment(1);
                warn!(handler = handler.name(), %kind, error = %e, "event handler failed");
            },
            Err(panic) => {
                shared.stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "metrics")]
                counter!(bus_metrics::HANDLER_FAILURES_TOTAL, labels::KIND => kind.to_string())
                    .increment(1);
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                error!(handler = handler.name(), %kind, reason, "event handler panicked");
            },
        }
    }

    #[cfg(feature = "metrics")]
    histogram!(bus_metrics::DISPATCH_DURATION_SECONDS).record(start.elapsed().as_secs_f64());
    #[cfg(not(feature = "metrics"))]
    let _ = start;
}
