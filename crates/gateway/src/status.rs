use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
};

use {
    chatrelay_bus::{EventBus, Subscription, handler_fn},
    chatrelay_common::{Event, EventKind, Platform, PlatformStatus, StatusKind},
    chrono::{DateTime, Utc},
    serde::Serialize,
};

/// Latest reported status of one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub platform: Platform,
    pub status: StatusKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// `None` until the platform reports for the first time.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Remembers the last `platform-status` event per platform.
#[derive(Clone, Default)]
pub struct StatusTracker {
    latest: Arc<RwLock<BTreeMap<Platform, StatusEntry>>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow status events on `bus` until the subscription is dropped.
    pub fn attach(&self, bus: &EventBus) -> Subscription {
        let tracker = self.clone();
        bus.subscribe_scoped(
            EventKind::PlatformStatus,
            handler_fn("status-tracker", move |event: Arc<Event>| {
                let tracker = tracker.clone();
                async move {
                    if let Event::PlatformStatus(status) = event.as_ref() {
                        tracker.record(status);
                    }
                    Ok(())
                }
            }),
        )
    }

    pub fn record(&self, status: &PlatformStatus) {
        let entry = StatusEntry {
            platform: status.platform,
            status: status.status,
            message: status.message.clone(),
            updated_at: Some(Utc::now()),
        };
        self.latest
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(status.platform, entry);
    }

    pub fn get(&self, platform: Platform) -> Option<StatusEntry> {
        self.latest
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&platform)
            .cloned()
    }

    /// One entry per platform; unreported ones show as stopped.
    pub fn snapshot(&self) -> Vec<StatusEntry> {
        let latest = self.latest.read().unwrap_or_else(|e| e.into_inner());
        Platform::ALL
            .iter()
            .map(|platform| {
                latest.get(platform).cloned().unwrap_or(StatusEntry {
                    platform: *platform,
                    status: StatusKind::Stopped,
                    message: None,
                    updated_at: None,
                })
            })
            .collect()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_covers_every_platform() {
        let tracker = StatusTracker::new();
        tracker.record(&PlatformStatus {
            platform: Platform::X,
            status: StatusKind::Waiting,
            message: Some("retrying in 5s".into()),
        });

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.len(), Platform::ALL.len());
        let x = snapshot.iter().find(|e| e.platform == Platform::X).unwrap();
        assert_eq!(x.status, StatusKind::Waiting);
        assert!(x.updated_at.is_some());
        let twitch = tracker.snapshot().into_iter().next().unwrap();
        assert_eq!(twitch.platform, Platform::Twitch);
        assert_eq!(twitch.status, StatusKind::Stopped);
        assert!(tracker.get(Platform::Twitch).is_none());
    }

    #[tokio::test]
    async fn follows_bus_events() {
        let bus = EventBus::new(16);
        let tracker = StatusTracker::new();
        let _sub = tracker.attach(&bus);

        bus.publish(Event::status(Platform::Youtube, StatusKind::Connected, None));
        for _ in 0..100 {
            if tracker.get(Platform::Youtube).is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(
            tracker.get(Platform::Youtube).unwrap().status,
            StatusKind::Connected
        );
    }
}
