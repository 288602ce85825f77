//! Relay lifecycle: one place that builds the bus, the control plane and
//! their listeners, and one that tears them down.

use std::{
    path::Path,
    sync::{Arc, RwLock},
    time::Duration,
};

use {
    chatrelay_bus::{BusStatsSnapshot, EventBus, Subscription},
    chatrelay_channels::{Connector, ConnectorFactory},
    chatrelay_common::{ChangeSource, ControlAction, Event, Platform},
    chatrelay_config::{RelayConfig, changed_keys, find_config_file, load_config},
    chatrelay_extension::ExtensionConnector,
    chatrelay_oauth::{CredentialStore, FileCredentialStore, OAuthRefresher, TokenRefresher},
    chatrelay_twitch::TwitchConnector,
    chatrelay_x::XConnector,
    chatrelay_youtube::YoutubeConnector,
    tracing::{debug, info, warn},
};

use crate::{control::ControlPlane, logs::BusLogSink, status::StatusTracker};

/// Builds the built-in connector for a platform from the current config.
///
/// A new connector is built for every start, so a restart picks up edited
/// platform settings.
pub struct ConfiguredConnectors {
    config: Arc<RwLock<RelayConfig>>,
}

impl ConfiguredConnectors {
    pub fn new(config: Arc<RwLock<RelayConfig>>) -> Self {
        Self { config }
    }
}

impl ConnectorFactory for ConfiguredConnectors {
    fn create(&self, platform: Platform) -> Option<Arc<dyn Connector>> {
        let config = self.config.read().unwrap_or_else(|e| e.into_inner());
        let connector: Arc<dyn Connector> = match platform {
            Platform::Twitch => Arc::new(TwitchConnector::new(config.twitch.clone())),
            Platform::Youtube => Arc::new(YoutubeConnector::new(config.youtube.clone())),
            Platform::X => Arc::new(XConnector::new(config.x.clone())),
            Platform::Extension => Arc::new(ExtensionConnector::new(config.extension.clone())),
        };
        Some(connector)
    }
}

/// Pieces a caller may supply instead of the defaults.
#[derive(Default)]
pub struct RelayBuilder {
    store: Option<Arc<dyn CredentialStore>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    factory: Option<Arc<dyn ConnectorFactory>>,
    log_sink: Option<BusLogSink>,
}

impl RelayBuilder {
    pub fn store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn factory(mut self, factory: Arc<dyn ConnectorFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Attach a [`BusLogLayer`](crate::logs::BusLogLayer) sink to the new bus.
    pub fn log_sink(mut self, sink: BusLogSink) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// Construct and wire everything. Must run inside a Tokio runtime.
    ///
    /// Order: bus, credential store, control plane, status tracker, control
    /// listener, log sink. Nothing is started yet; call
    /// [`Relay::autostart`] for that.
    pub fn build(self, config: RelayConfig) -> Relay {
        let bus = EventBus::new(config.bus.queue_capacity);
        let shared = Arc::new(RwLock::new(config.clone()));

        let store = self.store.unwrap_or_else(|| {
            Arc::new(FileCredentialStore::new().with_bus(bus.clone())) as Arc<dyn CredentialStore>
        });
        let owns_refresher = self.refresher.is_none();
        let refresher = self
            .refresher
            .unwrap_or_else(|| Arc::new(OAuthRefresher::from_config(&config)));
        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(ConfiguredConnectors::new(Arc::clone(&shared))));

        let control = ControlPlane::new(
            bus.clone(),
            factory,
            Arc::clone(&store),
            refresher,
            config.supervisor.clone(),
        );
        let status = StatusTracker::new();
        let subscriptions = vec![status.attach(&bus), control.listen()];

        if let Some(sink) = &self.log_sink {
            sink.attach(bus.clone());
        }
        info!(
            queue_capacity = config.bus.queue_capacity,
            enabled = ?config.enabled_platforms(),
            "relay initialized"
        );

        Relay {
            config: shared,
            bus,
            control,
            status,
            store,
            owns_refresher,
            log_sink: self.log_sink,
            subscriptions,
        }
    }
}

/// The running relay.
///
/// Lifecycle: [`Relay::builder`] → [`RelayBuilder::build`] →
/// [`Relay::autostart`] → ... → [`Relay::teardown`]. Teardown stops every
/// supervisor, drops the bus subscriptions, then shuts the bus down.
pub struct Relay {
    config: Arc<RwLock<RelayConfig>>,
    bus: EventBus,
    control: ControlPlane,
    status: StatusTracker,
    store: Arc<dyn CredentialStore>,
    owns_refresher: bool,
    log_sink: Option<BusLogSink>,
    subscriptions: Vec<Subscription>,
}

impl Relay {
    pub fn builder() -> RelayBuilder {
        RelayBuilder::default()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn control(&self) -> &ControlPlane {
        &self.control
    }

    pub fn status(&self) -> &StatusTracker {
        &self.status
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn config(&self) -> RelayConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn bus_stats(&self) -> BusStatsSnapshot {
        self.bus.stats()
    }

    /// Start every platform enabled in config, through the bus like an
    /// operator command.
    pub fn autostart(&self) -> Vec<Platform> {
        let platforms = self.config().enabled_platforms();
        for platform in &platforms {
            self.bus.publish(Event::control(*platform, ControlAction::Start));
        }
        info!(platforms = ?platforms, "autostart requested");
        platforms
    }

    /// Swap in a new configuration.
    ///
    /// Publishes `settings-changed` with the changed platform keys, so
    /// affected supervisors restart themselves. Platforms switched on or off
    /// are started or stopped. Returns the changed keys.
    pub fn apply_config(&self, new: RelayConfig) -> Vec<String> {
        let old = {
            let mut current = self.config.write().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *current, new.clone())
        };
        let keys = changed_keys(&old, &new);

        self.control.set_config(new.supervisor.clone());
        if self.owns_refresher && keys.iter().any(|k| k.ends_with(".oauth")) {
            self.control
                .set_refresher(Arc::new(OAuthRefresher::from_config(&new)));
        }

        let toggled: Vec<(Platform, bool)> = Platform::ALL
            .iter()
            .filter(|p| old.is_enabled(**p) != new.is_enabled(**p))
            .map(|p| (*p, new.is_enabled(*p)))
            .collect();

        // A platform switched on or off gets exactly one start or stop; a
        // restart request for it would undo a stop.
        let restart_keys: Vec<String> = keys
            .iter()
            .filter(|k| {
                let prefix = k.split_once('.').map_or(k.as_str(), |(p, _)| p);
                !toggled.iter().any(|(p, _)| p.as_str() == prefix)
            })
            .cloned()
            .collect();
        if restart_keys.is_empty() {
            debug!("config applied, no running platform affected");
        } else {
            info!(keys = ?restart_keys, "config changed");
            self.bus
                .publish(Event::settings_changed(restart_keys, ChangeSource::External));
        }

        for (platform, enabled) in toggled {
            let action = if enabled {
                ControlAction::Start
            } else {
                ControlAction::Stop
            };
            self.bus.publish(Event::control(platform, action));
        }
        keys
    }

    /// Re-read the config file and apply it.
    ///
    /// A file that fails to read or parse is an error and the current config
    /// stays in place. With no file at all the defaults apply, as at startup.
    pub fn reload(&self) -> anyhow::Result<Vec<String>> {
        match find_config_file() {
            Some(path) => self.reload_from(&path),
            None => {
                debug!("no config file found, reloading defaults");
                Ok(self.apply_config(RelayConfig::default()))
            },
        }
    }

    pub fn reload_from(&self, path: &Path) -> anyhow::Result<Vec<String>> {
        let config = load_config(path)?;
        Ok(self.apply_config(config))
    }

    /// Stop all supervisors and shut the bus down.
    pub async fn teardown(mut self) {
        info!("relay shutting down");
        if let Some(sink) = &self.log_sink {
            sink.detach();
        }
        // Stop listening first so no command can start a new supervisor.
        self.subscriptions.clear();
        self.control.stop_all().await;

        let timeout = Duration::from_secs(self.config().bus.shutdown_timeout_secs);
        self.bus.shutdown(timeout).await;
        let stats = self.bus.stats();
        if stats.dropped > 0 {
            warn!(dropped = stats.dropped, "events were dropped during this run");
        }
        info!("relay stopped");
    }
}
