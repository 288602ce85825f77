//! Forwards WARN and ERROR records onto the bus as `log` events.
//!
//! [`BusLogLayer`] is a `tracing_subscriber::Layer` installed before the bus
//! exists; [`BusLogSink::attach`] connects it once the relay is up. Records
//! from the bus crate itself are skipped so a full queue cannot feed itself.

use std::{
    fmt::Debug,
    sync::{Arc, RwLock},
};

use {
    chatrelay_bus::EventBus,
    chatrelay_common::{Event, LogRecord},
    tracing::{
        Level,
        field::{Field, Visit},
    },
    tracing_subscriber::{Layer, layer::Context},
};

const SKIPPED_TARGET: &str = "chatrelay_bus";

/// Shared slot holding the bus the layer publishes to.
#[derive(Clone, Default)]
pub struct BusLogSink {
    bus: Arc<RwLock<Option<EventBus>>>,
}

impl BusLogSink {
    pub fn attach(&self, bus: EventBus) {
        *self.bus.write().unwrap_or_else(|e| e.into_inner()) = Some(bus);
    }

    pub fn detach(&self) {
        self.bus.write().unwrap_or_else(|e| e.into_inner()).take();
    }

    fn publish(&self, record: LogRecord) {
        if let Some(bus) = self.bus.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            bus.publish(Event::Log(record));
        }
    }
}

pub struct BusLogLayer {
    sink: BusLogSink,
}

impl BusLogLayer {
    /// The layer plus the sink used to attach it to a bus later.
    pub fn new() -> (Self, BusLogSink) {
        let sink = BusLogSink::default();
        (Self { sink: sink.clone() }, sink)
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl MessageVisitor {
    /// Message followed by `key=value` pairs.
    fn finish(self) -> String {
        if self.fields.is_empty() {
            return self.message;
        }
        format!("{} {}", self.message, self.fields.join(" "))
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(format!("{}={value:?}", field.name()));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.into();
        } else {
            self.fields.push(format!("{}={value}", field.name()));
        }
    }
}

impl<S: tracing::Subscriber> Layer<S> for BusLogLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        // Level ordering: ERROR < WARN < INFO.
        if *meta.level() > Level::WARN || meta.target().starts_with(SKIPPED_TARGET) {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.sink.publish(LogRecord {
            level: meta.level().to_string(),
            target: meta.target().into(),
            message: visitor.finish(),
        });
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        chatrelay_bus::handler_fn,
        chatrelay_common::EventKind,
        std::time::Duration,
        tokio::sync::mpsc,
        tracing_subscriber::layer::SubscriberExt,
    };

    #[tokio::test]
    async fn forwards_warnings_only() {
        let bus = EventBus::new(16);
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(
            EventKind::Log,
            handler_fn("collect", move |event: Arc<Event>| {
                let tx = tx.clone();
                async move {
                    if let Event::Log(record) = event.as_ref() {
                        let _ = tx.send(record.clone());
                    }
                    Ok(())
                }
            }),
        );

        let (layer, sink) = BusLogLayer::new();
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("not forwarded");
            tracing::warn!(platform = "twitch", "before attach");
            sink.attach(bus.clone());
            tracing::info!("still not forwarded");
            tracing::warn!(target: "chatrelay_bus", "bus internals");
            tracing::error!(platform = "twitch", "connection lost");
            sink.detach();
            tracing::error!("after detach");
        });

        let record = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.level, "ERROR");
        assert_eq!(record.message, "connection lost platform=twitch");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }
}
