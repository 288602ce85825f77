//! X (Twitter) connector: polls mentions of the authenticated account and
//! replies in-thread.

pub mod api;
pub mod connector;
pub mod error;

pub use {
    connector::{X_LIMITS, XConnector},
    error::{Error, Result},
};
