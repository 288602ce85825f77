//! Platform connector contract and the per-platform connection supervisor.
//!
//! Each platform (Twitch, YouTube, X, the browser extension bridge)
//! implements [`Connector`]. A [`Supervisor`] wraps one connector in a
//! retry/backoff/refresh state machine, publishes inbound chat onto the bus
//! and feeds the platform's `send-response` events to a rate-limited
//! outbound loop.

pub mod backoff;
pub mod connector;
pub mod error;
pub mod outbound;
pub mod registry;
pub mod state;
pub mod supervisor;

pub use {
    backoff::Backoff,
    connector::{Connector, ConnectorFactory, PlatformSender, SendLimits, Session},
    error::{ConnectorError, Result},
    outbound::{format_response, truncate_chars},
    registry::ConnectorRegistry,
    state::SupervisorState,
    supervisor::Supervisor,
};
