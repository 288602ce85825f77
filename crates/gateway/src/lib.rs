//! Gateway: control plane, relay lifecycle and the operator HTTP API.
//!
//! Lifecycle:
//! 1. Build the relay (bus, credential store, control plane, listeners)
//! 2. Autostart enabled platforms
//! 3. Serve the operator API
//! 4. Tear down on shutdown: stop supervisors, then the bus
//!
//! Platform logic lives in the connector crates; this crate only wires them
//! to the bus.

pub mod api;
pub mod control;
pub mod error;
pub mod logs;
pub mod relay;
pub mod server;
pub mod status;

pub use {
    api::{AppState, build_router},
    control::{ControlPlane, TaskStatus},
    error::{Error, Result},
    logs::{BusLogLayer, BusLogSink},
    relay::{ConfiguredConnectors, Relay, RelayBuilder},
    server::{bind, serve},
    status::{StatusEntry, StatusTracker},
};
