#![allow(clippy::unwrap_used, clippy::expect_used)]
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use {
    chatrelay_bus::{EventBus, EventHandler, handler_fn},
    chatrelay_common::{
        ChatMessage, ControlAction, Event, EventKind, OutboundResponse, Platform, StatusKind,
    },
    tokio::sync::{Notify, mpsc},
};

fn chat(text: &str) -> Event {
    Event::ChatMessageReceived(ChatMessage::new(Platform::Twitch, "1", text).unwrap())
}

fn counting(
    name: &str,
    counter: &Arc<AtomicUsize>,
    done: &mpsc::UnboundedSender<()>,
) -> Arc<dyn EventHandler> {
    let counter = Arc::clone(counter);
    let done = done.clone();
    handler_fn(name, move |_| {
        let counter = Arc::clone(&counter);
        let done = done.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = done.send(());
            Ok(())
        }
    })
}

fn explode() -> anyhow::Result<()> {
    panic!("handler bug")
}

async fn wait_for(rx: &mut mpsc::UnboundedReceiver<()>, n: usize) {
    for _ in 0..n {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("handler invocation timed out")
            .expect("channel closed");
    }
}

#[tokio::test]
async fn fan_out_invokes_every_handler_once() {
    let bus = EventBus::new(16);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let counter = Arc::new(AtomicUsize::new(0));
    for i in 0..5 {
        bus.subscribe(
            EventKind::ChatMessageReceived,
            counting(&format!("h{i}"), &counter, &tx),
        );
    }

    assert!(bus.publish(chat("hello")));
    wait_for(&mut rx, 5).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn failing_and_panicking_handlers_are_isolated() {
    let bus = EventBus::new(16);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let counter = Arc::new(AtomicUsize::new(0));

    bus.subscribe(
        EventKind::ChatMessageReceived,
        handler_fn("fails", |_| async { Err(anyhow::anyhow!("boom")) }),
    );
    bus.subscribe(
        EventKind::ChatMessageReceived,
        handler_fn("panics", |_| async { explode() }),
    );
    bus.subscribe(
        EventKind::ChatMessageReceived,
        counting("ok", &counter, &tx),
    );

    bus.publish(chat("one"));
    bus.publish(chat("two"));
    wait_for(&mut rx, 2).await;

    // The worker survived both events and kept dispatching.
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(bus.stats().handler_failures, 4);
}

#[tokio::test]
async fn ancestor_subscriptions_receive_descendants() {
    let bus = EventBus::new(16);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let any = Arc::new(AtomicUsize::new(0));
    let chat_group = Arc::new(AtomicUsize::new(0));
    let platform_group = Arc::new(AtomicUsize::new(0));

    bus.subscribe(EventKind::Any, counting("any", &any, &tx));
    bus.subscribe(EventKind::Chat, counting("chat", &chat_group, &tx));
    bus.subscribe(
        EventKind::Platform,
        counting("platform", &platform_group, &tx),
    );

    bus.publish(Event::SendResponse(OutboundResponse::new(
        Platform::X,
        "123",
        "hi",
    )));
    bus.publish(Event::status(Platform::X, StatusKind::Connected, None));
    // any x2, chat x1, platform x1
    wait_for(&mut rx, 4).await;

    assert_eq!(any.load(Ordering::SeqCst), 2);
    assert_eq!(chat_group.load(Ordering::SeqCst), 1);
    assert_eq!(platform_group.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn publish_never_blocks_when_full() {
    let bus = EventBus::new(2);
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    {
        let entered = Arc::clone(&entered);
        let release = Arc::clone(&release);
        bus.subscribe(
            EventKind::ControlCommand,
            handler_fn("stuck", move |_| {
                let entered = Arc::clone(&entered);
                let release = Arc::clone(&release);
                async move {
                    entered.notify_one();
                    release.notified().await;
                    Ok(())
                }
            }),
        );
    }

    assert!(bus.publish(Event::control(Platform::Twitch, ControlAction::Start)));
    entered.notified().await;

    // The worker is stuck; two more fill the queue, the rest are dropped.
    let start = Instant::now();
    let accepted: Vec<bool> = (0..10)
        .map(|_| bus.publish(Event::control(Platform::Twitch, ControlAction::Stop)))
        .collect();
    assert!(start.elapsed() < Duration::from_millis(100));
    assert_eq!(accepted.iter().filter(|a| **a).count(), 2);

    let stats = bus.stats();
    assert_eq!(stats.dropped, 8);
    assert_eq!(stats.queued, 2);

    release.notify_waiters();
}

#[tokio::test]
async fn events_from_one_publisher_dispatch_in_order() {
    let bus = EventBus::new(64);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (tx, mut rx) = mpsc::unbounded_channel();
    {
        let seen = Arc::clone(&seen);
        bus.subscribe(
            EventKind::ChatMessageReceived,
            handler_fn("recorder", move |event| {
                let seen = Arc::clone(&seen);
                let tx = tx.clone();
                async move {
                    if let Event::ChatMessageReceived(msg) = event.as_ref() {
                        seen.lock().unwrap().push(msg.text.clone());
                    }
                    let _ = tx.send(());
                    Ok(())
                }
            }),
        );
    }

    for i in 0..20 {
        bus.publish(chat(&format!("m{i}")));
    }
    wait_for(&mut rx, 20).await;

    let expected: Vec<String> = (0..20).map(|i| format!("m{i}")).collect();
    assert_eq!(*seen.lock().unwrap(), expected);
}

#[tokio::test]
async fn shutdown_aborts_stuck_worker() {
    let bus = EventBus::new(4);
    let entered = Arc::new(Notify::new());
    {
        let entered = Arc::clone(&entered);
        bus.subscribe(
            EventKind::Log,
            handler_fn("forever", move |_| {
                let entered = Arc::clone(&entered);
                async move {
                    entered.notify_one();
                    std::future::pending::<()>().await;
                    Ok(())
                }
            }),
        );
    }
    bus.publish(Event::Log(chatrelay_common::LogRecord {
        level: "WARN".into(),
        target: "test".into(),
        message: "hang".into(),
    }));
    entered.notified().await;

    let start = Instant::now();
    bus.shutdown(Duration::from_millis(100)).await;
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(bus.is_closed());
}

#[tokio::test]
async fn shutdown_drains_queued_events_first() {
    let bus = EventBus::new(16);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let counter = Arc::new(AtomicUsize::new(0));
    bus.subscribe(EventKind::Chat, counting("drain", &counter, &tx));

    for i in 0..5 {
        bus.publish(chat(&format!("m{i}")));
    }
    bus.shutdown(Duration::from_secs(2)).await;
    wait_for(&mut rx, 5).await;
    assert_eq!(counter.load(Ordering::SeqCst), 5);
}
