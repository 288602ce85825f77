use std::{collections::HashMap, sync::Arc};

use chatrelay_common::Platform;

use crate::connector::{Connector, ConnectorFactory};

/// Fixed set of pre-built connectors, keyed by platform.
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<Platform, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connector` under its own platform, replacing any previous one.
    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        self.connectors.insert(connector.platform(), connector);
    }

    pub fn with(mut self, connector: Arc<dyn Connector>) -> Self {
        self.register(connector);
        self
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn Connector>> {
        self.connectors.get(&platform).cloned()
    }

    pub fn list(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.connectors.keys().copied().collect();
        platforms.sort();
        platforms
    }
}

impl ConnectorFactory for ConnectorRegistry {
    fn create(&self, platform: Platform) -> Option<Arc<dyn Connector>> {
        self.get(platform)
    }
}
