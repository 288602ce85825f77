//! In-process publish/subscribe event bus.
//!
//! Publishers never block: events go into a bounded queue and are dropped
//! (and counted) when it is full. A single worker task dequeues events in
//! publish order and fans each one out to every handler whose subscribed
//! [`EventKind`](chatrelay_common::EventKind) equals or is an ancestor of the
//! event's kind. Handlers run concurrently and fail in isolation.

mod bus;
mod handler;
mod stats;

pub use {
    bus::{DEFAULT_QUEUE_CAPACITY, EventBus, Subscription},
    handler::{EventHandler, FnHandler, handler_fn},
    stats::{BusStats, BusStatsSnapshot},
};
