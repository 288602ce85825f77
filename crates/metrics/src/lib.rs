//! Metrics collection and export for chatrelay.
//!
//! Crates record through the `metrics` facade macros re-exported here, using
//! the names in [`definitions`](crate). With the `prometheus` feature the
//! recorder renders the Prometheus text format for the `/metrics` endpoint;
//! without it every record is a no-op.
//!
//! ```rust,ignore
//! use chatrelay_metrics::{bus, counter};
//!
//! counter!(bus::EVENTS_DROPPED_TOTAL).increment(1);
//! ```

mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
