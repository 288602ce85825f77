//! Credential persistence and the token refresh contract.
//!
//! Supervisors only consume stored credentials and ask for refreshes; the
//! interactive authorization flow lives outside the relay.

mod config_dir;
pub mod error;
pub mod refresh;
pub mod store;
pub mod types;

pub use {
    config_dir::credentials_dir,
    error::{Error, RefreshError, Result},
    refresh::{OAuthClient, OAuthRefresher, TokenRefresher},
    store::{CredentialStore, FileCredentialStore, MemoryCredentialStore},
    types::{Credential, serialize_option_secret, serialize_secret},
};
